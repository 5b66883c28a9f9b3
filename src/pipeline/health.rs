//! Health counters for capture decisions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::coordinator::DropReason;

/// Decision and delivery counters for one capture coordinator
///
/// Drop reasons are counted separately so consumer backpressure can be told
/// apart from rate limiting, which is expected and not a problem.
/// All fields use atomic operations for thread-safe access.
pub struct CaptureHealth {
    created_at: Instant,

    /// Captures handed out to the capture machine
    pub captures_issued: AtomicU64,

    /// Frames accepted by the oracle and given to the client
    pub frames_delivered: AtomicU64,

    /// Oracle wanted a capture but no buffer was free
    pub drops_backpressure: AtomicU64,

    /// Buffer was free but the oracle declined
    pub drops_rate_limited: AtomicU64,

    /// Neither the oracle nor the pool wanted a capture
    pub drops_idle: AtomicU64,

    /// Events that arrived after the session stopped
    pub drops_stopped: AtomicU64,

    /// Completions refused as stale or duplicated
    pub completions_rejected: AtomicU64,

    /// Completions reported as failed by the capture machine
    pub completions_failed: AtomicU64,

    /// Micros since `created_at` of the last delivered frame
    last_frame_micros: AtomicU64,
}

impl CaptureHealth {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            captures_issued: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            drops_backpressure: AtomicU64::new(0),
            drops_rate_limited: AtomicU64::new(0),
            drops_idle: AtomicU64::new(0),
            drops_stopped: AtomicU64::new(0),
            completions_rejected: AtomicU64::new(0),
            completions_failed: AtomicU64::new(0),
            last_frame_micros: AtomicU64::new(0),
        }
    }

    pub fn record_capture(&self) {
        self.captures_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Backpressure => &self.drops_backpressure,
            DropReason::RateLimited => &self.drops_rate_limited,
            DropReason::Idle => &self.drops_idle,
            DropReason::Stopped => &self.drops_stopped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        let micros = self.created_at.elapsed().as_micros() as u64;
        self.last_frame_micros.store(micros, Ordering::Relaxed);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_completion(&self) {
        self.completions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_completion(&self) {
        self.completions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn captures_issued(&self) -> u64 {
        self.captures_issued.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn drops(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::Backpressure => self.drops_backpressure.load(Ordering::Relaxed),
            DropReason::RateLimited => self.drops_rate_limited.load(Ordering::Relaxed),
            DropReason::Idle => self.drops_idle.load(Ordering::Relaxed),
            DropReason::Stopped => self.drops_stopped.load(Ordering::Relaxed),
        }
    }

    pub fn completions_rejected(&self) -> u64 {
        self.completions_rejected.load(Ordering::Relaxed)
    }

    pub fn completions_failed(&self) -> u64 {
        self.completions_failed.load(Ordering::Relaxed)
    }

    /// Share of wanted captures lost to backpressure, as a percentage
    pub fn backpressure_rate(&self) -> f64 {
        let lost = self.drops(DropReason::Backpressure);
        let wanted = lost + self.captures_issued();
        if wanted == 0 {
            return 0.0;
        }
        (lost as f64 / wanted as f64) * 100.0
    }

    /// Check if no frame has been delivered for the given duration
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = Duration::from_micros(self.last_frame_micros.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last) > threshold
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            captures_issued: self.captures_issued(),
            frames_delivered: self.frames_delivered(),
            drops_backpressure: self.drops(DropReason::Backpressure),
            drops_rate_limited: self.drops(DropReason::RateLimited),
            drops_idle: self.drops(DropReason::Idle),
            drops_stopped: self.drops(DropReason::Stopped),
            completions_rejected: self.completions_rejected(),
            completions_failed: self.completions_failed(),
            backpressure_rate: self.backpressure_rate(),
        }
    }
}

impl Default for CaptureHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub captures_issued: u64,
    pub frames_delivered: u64,
    pub drops_backpressure: u64,
    pub drops_rate_limited: u64,
    pub drops_idle: u64,
    pub drops_stopped: u64,
    pub completions_rejected: u64,
    pub completions_failed: u64,
    pub backpressure_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} captures, {} delivered | drops: {} backpressure ({:.2}%), \
             {} rate-limited, {} idle, {} stopped | completions: {} rejected, {} failed",
            self.captures_issued,
            self.frames_delivered,
            self.drops_backpressure,
            self.backpressure_rate,
            self.drops_rate_limited,
            self.drops_idle,
            self.drops_stopped,
            self.completions_rejected,
            self.completions_failed
        )
    }
}

/// Health alert types
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAlert {
    /// No frame delivered for the stall threshold
    Stalled { duration: Duration },

    /// Too many wanted captures lost to backpressure
    HighBackpressure { rate: f64 },
}

impl std::fmt::Display for HealthAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthAlert::Stalled { duration } => {
                write!(f, "Capture stalled for {:?}", duration)
            }
            HealthAlert::HighBackpressure { rate } => {
                write!(f, "High backpressure: {:.2}% of captures dropped", rate)
            }
        }
    }
}

/// Health monitoring service
///
/// Periodically checks the counters and sends alerts when issues are detected.
pub struct HealthMonitor {
    health: Arc<CaptureHealth>,
    alert_tx: mpsc::Sender<HealthAlert>,
    check_interval: Duration,
    stall_threshold: Duration,
    backpressure_threshold: f64,
}

impl HealthMonitor {
    pub fn new(health: Arc<CaptureHealth>, alert_tx: mpsc::Sender<HealthAlert>) -> Self {
        Self {
            health,
            alert_tx,
            check_interval: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(5),
            backpressure_threshold: 10.0, // 10% of wanted captures
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    pub fn with_backpressure_threshold(mut self, threshold: f64) -> Self {
        self.backpressure_threshold = threshold;
        self
    }

    /// Run the monitor until `cancel` fires or the alert receiver goes away
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if self.health.is_stalled(self.stall_threshold)
                && self
                    .alert_tx
                    .send(HealthAlert::Stalled {
                        duration: self.stall_threshold,
                    })
                    .await
                    .is_err()
            {
                break;
            }

            let rate = self.health.backpressure_rate();
            if rate > self.backpressure_threshold
                && self
                    .alert_tx
                    .send(HealthAlert::HighBackpressure { rate })
                    .await
                    .is_err()
            {
                break;
            }
        }
    }
}
