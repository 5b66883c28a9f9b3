//! Capture oracle: frame numbering and delivery ordering

use log::{debug, warn};
use std::time::{Duration, Instant};

use super::sampler::EventSampler;
use super::types::EventKind;

/// Decides which events become captures and keeps deliveries in order.
///
/// Every dirty-content event advances the frame counter whether or not it is
/// sampled. A completion is only accepted when both its frame number and its
/// timestamp move past the last delivered frame, which rejects stale and
/// duplicated completions when several captures are in flight.
#[derive(Debug, Clone)]
pub struct CaptureOracle {
    sampler: EventSampler,
    frame_counter: u64,
    last_issued_frame_number: Option<u64>,
    last_delivered_frame_number: Option<u64>,
    last_delivered_timestamp: Option<Instant>,
    clock_anomalies: u64,
}

impl CaptureOracle {
    pub fn new(
        capture_period: Duration,
        events_reliable: bool,
        redundant_capture_goal: u32,
    ) -> Self {
        Self {
            sampler: EventSampler::new(capture_period, events_reliable, redundant_capture_goal),
            frame_counter: 0,
            last_issued_frame_number: None,
            last_delivered_frame_number: None,
            last_delivered_timestamp: None,
            clock_anomalies: 0,
        }
    }

    /// Whether the event of `kind` at `now` should be captured.
    pub fn observe_and_decide(&mut self, kind: EventKind, now: Instant) -> bool {
        if kind.is_dirty() {
            self.frame_counter += 1;
            self.sampler.observe_event(now)
        } else {
            self.sampler.is_overdue(now)
        }
    }

    /// Account for a capture the caller is about to perform and number it.
    ///
    /// Numbers are strictly increasing: a redundant capture of content that
    /// has already been numbered gets the next number.
    pub fn record_capture(&mut self) -> u64 {
        self.sampler.record_sample();

        if self.last_issued_frame_number == Some(self.frame_counter) {
            self.frame_counter += 1;
        }
        self.last_issued_frame_number = Some(self.frame_counter);
        self.frame_counter
    }

    /// Validate a finished capture before it is delivered.
    pub fn complete_capture(&mut self, frame_number: u64, timestamp: Instant) -> bool {
        if let Some(last) = self.last_delivered_frame_number {
            if frame_number <= last {
                debug!(
                    "Rejecting frame {}: frame {} was already delivered",
                    frame_number, last
                );
                return false;
            }
        }

        if let Some(last) = self.last_delivered_timestamp {
            if timestamp == last {
                debug!("Rejecting frame {}: duplicate timestamp", frame_number);
                return false;
            }
            if timestamp < last {
                self.clock_anomalies += 1;
                warn!(
                    "Frame {} completed {:?} before the last delivered frame",
                    frame_number,
                    last - timestamp
                );
            }
        }

        self.last_delivered_frame_number = Some(frame_number);
        self.last_delivered_timestamp = Some(timestamp);
        true
    }

    pub fn sampler(&self) -> &EventSampler {
        &self.sampler
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn last_delivered_frame_number(&self) -> Option<u64> {
        self.last_delivered_frame_number
    }

    pub fn last_delivered_timestamp(&self) -> Option<Instant> {
        self.last_delivered_timestamp
    }

    /// Completions accepted with a timestamp earlier than their predecessor.
    pub fn clock_anomalies(&self) -> u64 {
        self.clock_anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);

    fn oracle() -> CaptureOracle {
        CaptureOracle::new(PERIOD, true, 3)
    }

    #[test]
    fn test_dirty_events_advance_counter() {
        let mut oracle = oracle();
        let start = Instant::now();

        assert!(oracle.observe_and_decide(EventKind::CompositorUpdate, start));
        oracle.record_capture();
        // sampled or not, each dirty event counts
        let later = start + Duration::from_millis(1);
        assert!(!oracle.observe_and_decide(EventKind::SoftwarePaint, later));
        assert_eq!(oracle.frame_counter(), 2);

        oracle.observe_and_decide(EventKind::TimerPoll, start + Duration::from_millis(2));
        oracle.observe_and_decide(EventKind::MouseCursorUpdate, start + Duration::from_millis(3));
        let refresh_at = start + Duration::from_millis(4);
        oracle.observe_and_decide(EventKind::ActiveRefreshRequest, refresh_at);
        assert_eq!(oracle.frame_counter(), 2);
    }

    #[test]
    fn test_non_dirty_events_poll() {
        let start = Instant::now();

        // nothing sampled yet, so a poll is overdue
        assert!(oracle().observe_and_decide(EventKind::TimerPoll, start));

        let mut oracle = oracle();
        assert!(oracle.observe_and_decide(EventKind::CompositorUpdate, start));
        oracle.record_capture();

        assert!(!oracle.observe_and_decide(EventKind::MouseCursorUpdate, start + PERIOD));
        assert!(oracle.observe_and_decide(EventKind::ActiveRefreshRequest, start + PERIOD * 4));
    }

    #[test]
    fn test_record_capture_strictly_increasing() {
        let mut oracle = oracle();
        let start = Instant::now();
        let mut numbers = Vec::new();

        oracle.observe_and_decide(EventKind::CompositorUpdate, start);
        numbers.push(oracle.record_capture());
        // redundant captures of the same content
        for i in 1..=3 {
            assert!(oracle.observe_and_decide(EventKind::TimerPoll, start + PERIOD * 4 * i));
            numbers.push(oracle.record_capture());
        }
        for i in 0..20 {
            let t = start + Duration::from_secs(2) + PERIOD * i;
            if oracle.observe_and_decide(EventKind::CompositorUpdate, t) {
                numbers.push(oracle.record_capture());
            }
        }

        assert!(numbers.len() > 10);
        assert!(numbers.windows(2).all(|w| w[0] < w[1]), "{:?}", numbers);
    }

    #[test]
    fn test_completion_is_idempotent() {
        let mut oracle = oracle();
        let t = Instant::now();
        assert!(oracle.complete_capture(1, t));
        assert!(!oracle.complete_capture(1, t));
        assert_eq!(oracle.last_delivered_frame_number(), Some(1));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut oracle = oracle();
        let t = Instant::now();
        assert!(oracle.complete_capture(5, t));
        assert!(!oracle.complete_capture(4, t + Duration::from_millis(10)));
        assert!(!oracle.complete_capture(4, t - Duration::from_millis(10)));
        assert!(oracle.complete_capture(6, t + Duration::from_millis(20)));
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let mut oracle = oracle();
        let t = Instant::now();
        assert!(oracle.complete_capture(1, t));
        assert!(!oracle.complete_capture(2, t));
        assert_eq!(oracle.last_delivered_frame_number(), Some(1));
    }

    #[test]
    fn test_first_frame_zero_accepted() {
        let mut oracle = oracle();
        assert!(oracle.complete_capture(0, Instant::now()));
    }

    #[test]
    fn test_clock_anomaly_accepted() {
        let mut oracle = oracle();
        let t = Instant::now() + Duration::from_secs(1);
        assert!(oracle.complete_capture(1, t));
        assert!(oracle.complete_capture(2, t - Duration::from_millis(5)));
        assert_eq!(oracle.clock_anomalies(), 1);
        assert_eq!(oracle.last_delivered_timestamp(), Some(t - Duration::from_millis(5)));
    }
}
