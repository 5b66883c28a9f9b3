//! Simulated capture machine
//!
//! Stands in for a platform capturer: a source repaints at a fixed rate, a
//! timer polls at the capture period, and each issued capture is copied out
//! after a fixed latency.

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, info, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::CaptureError;
use crate::oracle::types::{Event, EventKind, Size};
use crate::pipeline::coordinator::{CaptureCoordinator, Decision, InFlightCapture};
use crate::pipeline::machine::CaptureMachine;

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Repaints per second of the simulated source. Zero means static content.
    pub source_rate: f64,
    pub source_size: Size,
    /// Time between a capture decision and its completion
    pub copy_latency: Duration,
    pub fail_on_start: bool,
    /// Report the source as lost after this long
    pub source_lost_after: Option<Duration>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            source_rate: 60.0,
            source_size: Size::new(1920, 1080),
            copy_latency: Duration::from_millis(4),
            fail_on_start: false,
            source_lost_after: None,
        }
    }
}

/// Producer task of one session, keyed by its coordinator
struct RunningSession {
    coordinator: Arc<CaptureCoordinator>,
    cancel: CancellationToken,
}

pub struct SimulatedMachine {
    config: SimulatedConfig,
    sessions: Mutex<Vec<RunningSession>>,
}

impl SimulatedMachine {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    /// Number of sessions started and not yet stopped
    pub fn running_sessions(&self) -> usize {
        self.lock_sessions().len()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, Vec<RunningSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn source_period(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.config.source_rate)
            .ok()
            .filter(|period| !period.is_zero())
    }
}

#[async_trait]
impl CaptureMachine for SimulatedMachine {
    async fn start(&self, coordinator: Arc<CaptureCoordinator>) -> Result<()> {
        if self.config.fail_on_start {
            bail!("simulated source refused to start");
        }

        coordinator.update_capture_size(self.config.source_size);

        let cancel = CancellationToken::new();
        self.lock_sessions().push(RunningSession {
            coordinator: Arc::clone(&coordinator),
            cancel: cancel.clone(),
        });

        let poll_period = coordinator.params().capture_period();
        let source_period = self.source_period();
        let latency = self.config.copy_latency;
        let lost_after = self.config.source_lost_after;

        info!(
            "Simulated source {} at {} Hz, polling every {:?}",
            self.config.source_size, self.config.source_rate, poll_period
        );

        tokio::spawn(async move {
            let mut poll = interval(poll_period);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut source = source_period.map(|period| {
                let mut source = interval(period);
                source.set_missed_tick_behavior(MissedTickBehavior::Skip);
                source
            });
            let lost = async {
                match lost_after {
                    Some(after) => tokio::time::sleep(after).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(lost);

            loop {
                let repaint = async {
                    match source.as_mut() {
                        Some(source) => {
                            source.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                let kind = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = &mut lost => {
                        let reason = "simulated source went away".to_string();
                        coordinator.report_error(&CaptureError::SourceLost(reason).to_string());
                        break;
                    }
                    _ = repaint => EventKind::CompositorUpdate,
                    _ = poll.tick() => EventKind::TimerPoll,
                };

                let event = Event::new(kind, Instant::now());
                match coordinator.observe_event_and_decide(event.kind, event.time) {
                    Decision::Capture(capture) => {
                        let coordinator = Arc::clone(&coordinator);
                        tokio::spawn(copy_frame(coordinator, capture, event, latency));
                    }
                    Decision::Drop(reason) if coordinator.is_stopped() => {
                        debug!("Simulated source stopping: {}", reason);
                        break;
                    }
                    Decision::Drop(_) => {}
                }
            }
        });

        Ok(())
    }

    async fn stop(&self, coordinator: Arc<CaptureCoordinator>) {
        let stopped = {
            let mut sessions = self.lock_sessions();
            let index = sessions
                .iter()
                .position(|session| Arc::ptr_eq(&session.coordinator, &coordinator));
            index.map(|index| sessions.swap_remove(index))
        };
        match stopped {
            Some(session) => session.cancel.cancel(),
            None => debug!("Simulated source: no running session to stop"),
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

async fn copy_frame(
    coordinator: Arc<CaptureCoordinator>,
    mut capture: InFlightCapture,
    event: Event,
    latency: Duration,
) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let fill = capture.frame_number() as u8;
    capture.frame_mut().data_mut().fill(fill);
    // the frame shows the content as of the triggering event
    trace!("Simulated copy of frame {} for {}", capture.frame_number(), event.kind);
    coordinator.complete(capture, event.time, true);
}
