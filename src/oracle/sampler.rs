//! Token bucket event sampler
//!
//! Turns a bursty stream of content events into sampling decisions that track
//! a target capture period. Events earn credit equal to the time elapsed since
//! the previous event, each sample spends one capture period of credit, and
//! the credit is capped at 1.5 capture periods so an idle source can not bank
//! a burst of back-to-back samples.
//!
//! When the content stops changing, timer polls keep sampling the same content
//! `redundant_capture_goal` more times (spaced at least four capture periods
//! apart) before the sampler goes dormant. Sources whose events are not
//! reliable never go dormant.

use std::time::{Duration, Instant};

use crate::assets::{OVERDUE_POLL_PERIODS, TOKEN_BUCKET_PERIODS};

#[derive(Debug, Clone)]
pub struct EventSampler {
    capture_period: Duration,
    events_reliable: bool,
    redundant_capture_goal: u32,
    token_bucket_capacity: Duration,
    /// Signed nanoseconds of credit; `record_sample` may push it below zero.
    token_bucket: i128,
    current_event_time: Option<Instant>,
    last_sample_time: Option<Instant>,
    overdue_sample_count: u32,
}

impl EventSampler {
    pub fn new(
        capture_period: Duration,
        events_reliable: bool,
        redundant_capture_goal: u32,
    ) -> Self {
        let token_bucket_capacity =
            Duration::try_from_secs_f64(capture_period.as_secs_f64() * TOKEN_BUCKET_PERIODS)
                .unwrap_or(Duration::MAX);
        Self {
            capture_period,
            events_reliable,
            redundant_capture_goal,
            token_bucket_capacity,
            // start full so the very first event is sampled
            token_bucket: nanos(token_bucket_capacity),
            current_event_time: None,
            last_sample_time: None,
            overdue_sample_count: 0,
        }
    }

    /// Record an event at `now` and tell whether it should be sampled right away.
    pub fn observe_event(&mut self, now: Instant) -> bool {
        if let Some(current) = self.current_event_time {
            // a clock regression earns no credit
            if now > current {
                let earned = nanos(now - current);
                self.token_bucket =
                    (self.token_bucket + earned).clamp(0, nanos(self.token_bucket_capacity));
            }
        }
        self.current_event_time = Some(now);
        self.token_bucket >= nanos(self.capture_period)
    }

    /// Spend one capture period of credit for a sample the caller just took.
    pub fn record_sample(&mut self) {
        self.token_bucket -= nanos(self.capture_period);

        if self.has_unrecorded_event() {
            self.last_sample_time = self.current_event_time;
            self.overdue_sample_count = 0;
        } else if self.overdue_sample_count < self.redundant_capture_goal {
            self.overdue_sample_count += 1;
        }
    }

    /// Whether a timer poll at `now` should trigger a sample.
    pub fn is_overdue(&self, now: Instant) -> bool {
        if self.events_reliable
            && !self.has_unrecorded_event()
            && self.overdue_sample_count >= self.redundant_capture_goal
        {
            return false;
        }

        match self.last_sample_time {
            None => true,
            Some(last) => {
                now.saturating_duration_since(last)
                    >= self.capture_period.saturating_mul(OVERDUE_POLL_PERIODS)
            }
        }
    }

    pub fn has_unrecorded_event(&self) -> bool {
        self.current_event_time.is_some() && self.current_event_time != self.last_sample_time
    }

    pub fn capture_period(&self) -> Duration {
        self.capture_period
    }

    pub fn events_reliable(&self) -> bool {
        self.events_reliable
    }

    pub fn redundant_capture_goal(&self) -> u32 {
        self.redundant_capture_goal
    }

    pub fn token_bucket_capacity(&self) -> Duration {
        self.token_bucket_capacity
    }

    /// Current credit, reported as zero while an over-recorded bucket is in deficit.
    pub fn token_bucket(&self) -> Duration {
        Duration::from_nanos(self.token_bucket.clamp(0, u64::MAX as i128) as u64)
    }

    pub fn current_event_time(&self) -> Option<Instant> {
        self.current_event_time
    }

    pub fn last_sample_time(&self) -> Option<Instant> {
        self.last_sample_time
    }

    pub fn overdue_sample_count(&self) -> u32 {
        self.overdue_sample_count
    }
}

fn nanos(duration: Duration) -> i128 {
    duration.as_nanos() as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);

    fn drive(
        sampler: &mut EventSampler,
        start: Instant,
        spacing: Duration,
        count: u32,
    ) -> Vec<bool> {
        (0..count)
            .map(|i| {
                let sampled = sampler.observe_event(start + spacing * i);
                if sampled {
                    sampler.record_sample();
                }
                sampled
            })
            .collect()
    }

    #[test]
    fn test_first_event_sampled() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        assert!(sampler.observe_event(Instant::now()));
        assert!(sampler.has_unrecorded_event());
        sampler.record_sample();
        assert!(!sampler.has_unrecorded_event());
    }

    #[test]
    fn test_two_for_one_convergence() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let results = drive(&mut sampler, Instant::now(), PERIOD / 2, 200);

        // past the initial burst, every other event is sampled
        for (i, sampled) in results.iter().enumerate().skip(2) {
            assert_eq!(*sampled, i % 2 == 1, "event {} sampled={}", i, sampled);
        }
        let taken = results.iter().filter(|s| **s).count();
        assert!((99..=101).contains(&taken), "sampled {} of 200", taken);
    }

    #[test]
    fn test_sub_rate_pass_through() {
        for spacing in [PERIOD, PERIOD * 2, PERIOD.mul_f64(1.3)] {
            let mut sampler = EventSampler::new(PERIOD, true, 3);
            let results = drive(&mut sampler, Instant::now(), spacing, 100);
            assert!(results.iter().all(|s| *s), "spacing {:?} dropped an event", spacing);
        }
    }

    #[test]
    fn test_bucket_bounds() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let capacity = nanos(sampler.token_bucket_capacity());
        let start = Instant::now();
        let mut offset = Duration::ZERO;
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..5_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            // 0..=300ms, with a few repeated timestamps
            offset += Duration::from_millis(seed % 301);
            if sampler.observe_event(start + offset) {
                sampler.record_sample();
            }
            assert!(sampler.token_bucket >= 0, "bucket went negative");
            assert!(sampler.token_bucket <= capacity, "bucket above capacity");
        }
    }

    #[test]
    fn test_clock_regression_earns_nothing() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let start = Instant::now() + Duration::from_secs(1);

        assert!(sampler.observe_event(start));
        sampler.record_sample();
        let before = sampler.token_bucket();

        assert!(!sampler.observe_event(start - Duration::from_millis(500)));
        assert_eq!(sampler.token_bucket(), before);
    }

    #[test]
    fn test_capacity_caps_idle_credit() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let start = Instant::now();
        assert!(sampler.observe_event(start));
        sampler.record_sample();

        // a long silence only refills up to capacity
        assert!(sampler.observe_event(start + Duration::from_secs(10)));
        assert_eq!(sampler.token_bucket(), sampler.token_bucket_capacity());
        sampler.record_sample();

        // so a burst right after only gets half a period of slack
        assert!(!sampler.observe_event(start + Duration::from_secs(10) + Duration::from_millis(1)));
    }

    #[test]
    fn test_overdue_before_any_sample() {
        let sampler = EventSampler::new(PERIOD, true, 3);
        assert!(sampler.is_overdue(Instant::now()));
    }

    #[test]
    fn test_overdue_threshold() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let start = Instant::now();
        assert!(sampler.observe_event(start));
        sampler.record_sample();

        assert!(!sampler.is_overdue(start + PERIOD));
        assert!(!sampler.is_overdue(start + PERIOD * 4 - Duration::from_millis(1)));
        assert!(sampler.is_overdue(start + PERIOD * 4));
    }

    #[test]
    fn test_dormancy_after_redundancy_goal() {
        let goal = 3;
        let mut sampler = EventSampler::new(PERIOD, true, goal);
        let start = Instant::now();
        assert!(sampler.observe_event(start));
        sampler.record_sample();

        let mut overdue = 0;
        for i in 1..=20 {
            if sampler.is_overdue(start + PERIOD * 4 * i) {
                sampler.record_sample();
                overdue += 1;
            }
        }
        assert_eq!(overdue, goal);
        assert_eq!(sampler.overdue_sample_count(), goal);

        // a new event wakes the sampler up again
        let later = start + Duration::from_secs(60);
        assert!(sampler.observe_event(later));
        assert!(sampler.is_overdue(later));
        sampler.record_sample();
        assert_eq!(sampler.overdue_sample_count(), 0);
    }

    #[test]
    fn test_unreliable_events_never_go_dormant() {
        let mut sampler = EventSampler::new(PERIOD, false, 2);
        let start = Instant::now();
        assert!(sampler.observe_event(start));
        sampler.record_sample();

        for i in 1..=10 {
            assert!(sampler.is_overdue(start + PERIOD * 4 * i));
            sampler.record_sample();
        }
        assert_eq!(sampler.overdue_sample_count(), 2);
    }

    #[test]
    fn test_over_recording_self_corrects() {
        let mut sampler = EventSampler::new(PERIOD, true, 3);
        let start = Instant::now();
        assert!(sampler.observe_event(start));
        sampler.record_sample();
        sampler.record_sample();
        sampler.record_sample();
        assert_eq!(sampler.token_bucket(), Duration::ZERO);

        // the deficit swallows the credit of the next event
        assert!(!sampler.observe_event(start + PERIOD));
        assert!(sampler.observe_event(start + PERIOD * 3));
    }
}
