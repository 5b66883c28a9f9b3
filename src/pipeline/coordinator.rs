//! Capture coordinator
//!
//! Couples the oracle's sampling decisions with buffer reservation from the
//! client. All state sits behind one mutex that is never held across a
//! blocking call: buffer reservation is non-blocking by the client contract,
//! and delivery and error reporting run after the lock is released.

use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

use super::health::CaptureHealth;
use crate::capture::client::CaptureClient;
use crate::capture::frame_pool::FrameBuffer;
use crate::config::OracleConfig;
use crate::error::CaptureError;
use crate::oracle::types::{CaptureParams, EventKind, PixelFormat, ResolutionChangePolicy, Size};
use crate::oracle::CaptureOracle;

/// Why an event did not turn into a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The session has been stopped
    Stopped,
    /// The oracle wanted a capture but the client had no free buffer
    Backpressure,
    /// A buffer was free but the oracle declined
    RateLimited,
    /// Neither the oracle nor the buffer pool allowed a capture
    Idle,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Stopped => write!(f, "stopped"),
            DropReason::Backpressure => write!(f, "backpressure"),
            DropReason::RateLimited => write!(f, "rate-limited"),
            DropReason::Idle => write!(f, "idle"),
        }
    }
}

/// Correlates a capture decision with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken {
    frame_number: u64,
}

impl CompletionToken {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// A capture the machine has been asked to perform.
///
/// Fill the frame, then hand it back through `CaptureCoordinator::complete`.
/// Dropping it instead abandons the capture and releases the buffer.
#[derive(Debug)]
pub struct InFlightCapture {
    token: CompletionToken,
    frame: FrameBuffer,
    format: PixelFormat,
    size: Size,
}

impl InFlightCapture {
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    pub fn frame_number(&self) -> u64 {
        self.token.frame_number
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn frame_size(&self) -> Size {
        self.size
    }
}

#[derive(Debug)]
pub enum Decision {
    Drop(DropReason),
    Capture(InFlightCapture),
}

impl Decision {
    pub fn is_capture(&self) -> bool {
        matches!(self, Decision::Capture(_))
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Decision::Drop(reason) => Some(*reason),
            Decision::Capture(_) => None,
        }
    }
}

pub type ErrorHook = Box<dyn Fn(&str) + Send + Sync>;

struct CoordinatorState {
    oracle: CaptureOracle,
    params: CaptureParams,
    client: Option<Arc<dyn CaptureClient>>,
    min_frame_size: Size,
    frame_size_set: bool,
    // aspect ratio locked in by the first size negotiation
    locked_aspect: Option<Size>,
}

struct PendingDelivery {
    client: Arc<dyn CaptureClient>,
    frame: FrameBuffer,
    format: PixelFormat,
    size: Size,
    timestamp: Instant,
}

/// Thread-safe front of one capture session
pub struct CaptureCoordinator {
    state: Mutex<CoordinatorState>,
    // accepted frames in acceptance order, filled under the state lock
    outbox: Mutex<VecDeque<PendingDelivery>>,
    // held by the one thread currently handing frames to the client
    drainer: Mutex<()>,
    health: Arc<CaptureHealth>,
    error_hook: Option<ErrorHook>,
}

impl CaptureCoordinator {
    pub fn new(
        params: CaptureParams,
        config: &OracleConfig,
        client: Arc<dyn CaptureClient>,
    ) -> Result<Self, CaptureError> {
        params.validate(config)?;

        let oracle = CaptureOracle::new(
            params.capture_period(),
            config.events_reliable,
            config.redundant_capture_goal,
        );
        Ok(Self {
            state: Mutex::new(CoordinatorState {
                oracle,
                params,
                client: Some(client),
                min_frame_size: config.min_frame_size,
                frame_size_set: false,
                locked_aspect: None,
            }),
            outbox: Mutex::new(VecDeque::new()),
            drainer: Mutex::new(()),
            health: Arc::new(CaptureHealth::new()),
            error_hook: None,
        })
    }

    /// Run `hook` after a reported error has been forwarded to the client.
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether the event of `kind` at `now` becomes a capture.
    pub fn observe_event_and_decide(&self, kind: EventKind, now: Instant) -> Decision {
        let mut state = self.lock();

        let format = state.params.pixel_format;
        let size = state.params.requested_frame_size;
        let buffer = match &state.client {
            Some(client) => client.try_reserve(format, size),
            None => {
                self.health.record_drop(DropReason::Stopped);
                return Decision::Drop(DropReason::Stopped);
            }
        };

        let should_capture = state.oracle.observe_and_decide(kind, now);

        match (should_capture, buffer) {
            (true, Some(frame)) => {
                let frame_number = state.oracle.record_capture();
                self.health.record_capture();
                trace!("Capturing frame {} on {}", frame_number, kind);
                Decision::Capture(InFlightCapture {
                    token: CompletionToken { frame_number },
                    frame,
                    format,
                    size,
                })
            }
            (true, None) => {
                debug!("Dropping {} event: no free buffer", kind);
                self.health.record_drop(DropReason::Backpressure);
                Decision::Drop(DropReason::Backpressure)
            }
            (false, Some(buffer)) => {
                drop(buffer);
                self.health.record_drop(DropReason::RateLimited);
                Decision::Drop(DropReason::RateLimited)
            }
            (false, None) => {
                trace!("Dropping {} event: not sampled and no free buffer", kind);
                self.health.record_drop(DropReason::Idle);
                Decision::Drop(DropReason::Idle)
            }
        }
    }

    /// Finish a capture. Returns whether the frame was accepted for delivery.
    ///
    /// The buffer is released whenever the frame is not accepted. Accepted
    /// frames reach the client in acceptance order, outside the state lock,
    /// so the client may call back into the coordinator from `deliver`.
    pub fn complete(&self, capture: InFlightCapture, timestamp: Instant, success: bool) -> bool {
        let InFlightCapture {
            token,
            frame,
            format,
            size,
        } = capture;

        {
            let mut state = self.lock();
            if !success {
                debug!("Capture of frame {} failed", token.frame_number);
                self.health.record_failed_completion();
                return false;
            }
            let Some(client) = state.client.clone() else {
                return false;
            };
            if !state.oracle.complete_capture(token.frame_number, timestamp) {
                self.health.record_rejected_completion();
                return false;
            }

            // queued before the state lock is released to keep acceptance order
            self.lock_outbox().push_back(PendingDelivery {
                client,
                frame,
                format,
                size,
                timestamp,
            });
        }

        self.drain_deliveries();
        true
    }

    fn lock_outbox(&self) -> MutexGuard<'_, VecDeque<PendingDelivery>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Hands queued frames to the client. Only one thread drains at a time; a
    // thread that finds the drainer busy leaves its frame to that thread,
    // including a reentrant `complete` from inside `deliver`.
    fn drain_deliveries(&self) {
        loop {
            let drainer = match self.drainer.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };

            loop {
                let next = self.lock_outbox().pop_front();
                let Some(pending) = next else {
                    break;
                };
                pending
                    .client
                    .deliver(pending.frame, pending.format, pending.size, pending.timestamp);
                self.health.record_delivery();
            }

            drop(drainer);
            // a frame queued while this thread still held the drainer
            if self.lock_outbox().is_empty() {
                return;
            }
        }
    }

    /// Recompute the output frame size for a source of `source_size`.
    ///
    /// The result fits within the maximum frame size, never exceeds the
    /// source, and has even dimensions. With a `Fixed` policy only the first
    /// call has an effect.
    pub fn update_capture_size(&self, source_size: Size) {
        let mut state = self.lock();
        let policy = state.params.resolution_change_policy;
        if state.frame_size_set && !policy.allows_variable_resolution() {
            return;
        }

        let aspect = match (policy, state.locked_aspect) {
            (ResolutionChangePolicy::FixedAspectRatio, Some(locked)) => locked,
            _ => source_size,
        };
        let Some(size) = fit_frame_size(source_size, state.params.max_frame_size, aspect) else {
            warn!("Ignoring degenerate source size {}", source_size);
            return;
        };
        if !state.min_frame_size.fits_within(&size) {
            warn!(
                "Source size {} yields frame size {} below the minimum {}",
                source_size, size, state.min_frame_size
            );
            return;
        }

        if size != state.params.requested_frame_size {
            info!(
                "Capture size {} -> {} (source {})",
                state.params.requested_frame_size, size, source_size
            );
        }
        state.params.requested_frame_size = size;
        state.frame_size_set = true;
        if state.locked_aspect.is_none() {
            state.locked_aspect = Some(size);
        }
    }

    /// Stop issuing captures. Completions still release their buffers but
    /// are no longer delivered.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.client.take().is_some() {
            info!("CaptureCoordinator: stopped");
        }
    }

    /// Forward `reason` to the client once, then stop.
    pub fn report_error(&self, reason: &str) {
        let client = self.lock().client.take();
        let Some(client) = client else {
            debug!("Ignoring error after stop: {}", reason);
            return;
        };

        error!("CaptureCoordinator: {}", reason);
        client.on_error(reason);
        if let Some(hook) = &self.error_hook {
            hook(reason);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().client.is_none()
    }

    pub fn frame_size(&self) -> Size {
        self.lock().params.requested_frame_size
    }

    pub fn params(&self) -> CaptureParams {
        self.lock().params.clone()
    }

    /// Snapshot of the oracle state
    pub fn oracle(&self) -> CaptureOracle {
        self.lock().oracle.clone()
    }

    pub fn health(&self) -> &Arc<CaptureHealth> {
        &self.health
    }
}

/// Largest even size with the aspect ratio of `aspect` that fits both the
/// source and the maximum.
fn fit_frame_size(source: Size, max: Size, aspect: Size) -> Option<Size> {
    if source.is_empty() || max.is_empty() || aspect.is_empty() {
        return None;
    }

    let bound_w = source.width.min(max.width) as u64;
    let bound_h = source.height.min(max.height) as u64;
    let (aspect_w, aspect_h) = (aspect.width as u64, aspect.height as u64);

    let (width, height) = if aspect_w * bound_h <= aspect_h * bound_w {
        // height-limited
        (bound_h * aspect_w / aspect_h, bound_h)
    } else {
        (bound_w, bound_w * aspect_h / aspect_w)
    };
    Some(Size::new(width as u32, height as u32).even_floor())
}
