//! Capture device lifecycle
//!
//! Owns the Idle/Capturing/Error state of a capture source and wires a
//! coordinator to the capture machine for each session.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::coordinator::CaptureCoordinator;
use super::machine::CaptureMachine;
use super::state::DeviceState;
use crate::capture::client::CaptureClient;
use crate::config::OracleConfig;
use crate::error::CaptureError;
use crate::oracle::types::CaptureParams;

struct Session {
    id: u64,
    coordinator: Arc<CaptureCoordinator>,
    // fires once to stop the machine and the health logger
    shutdown: CancellationToken,
}

struct DeviceInner {
    state: DeviceState,
    session: Option<Session>,
    next_session_id: u64,
}

impl DeviceInner {
    fn transition(&mut self, next: DeviceState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid device transition {} -> {}",
            self.state,
            next
        );
        debug!("Device {} -> {}", self.state, next);
        self.state = next;
    }
}

struct DeviceShared {
    machine: Arc<dyn CaptureMachine>,
    config: OracleConfig,
    runtime: Handle,
    inner: Mutex<DeviceInner>,
}

/// Handle to a capture device. Clones share the same device.
#[derive(Clone)]
pub struct CaptureDevice {
    shared: Arc<DeviceShared>,
}

impl CaptureDevice {
    pub fn new(machine: Arc<dyn CaptureMachine>, config: OracleConfig, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(DeviceShared {
                machine,
                config,
                runtime,
                inner: Mutex::new(DeviceInner {
                    state: DeviceState::Idle,
                    session: None,
                    next_session_id: 1,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceInner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session delivering frames to `client`.
    ///
    /// Invalid parameters are reported to the client and leave the device
    /// idle. Ignored unless the device is idle.
    pub fn allocate_and_start(&self, params: CaptureParams, client: Arc<dyn CaptureClient>) {
        let mut inner = self.lock();
        if !inner.state.is_idle() {
            warn!("Ignoring start request: device is {}", inner.state);
            return;
        }

        let created = CaptureCoordinator::new(params, &self.shared.config, Arc::clone(&client));
        let coordinator = match created {
            Ok(coordinator) => coordinator,
            Err(e) => {
                drop(inner);
                error!("Rejecting capture request: {}", e);
                client.on_error(&e.to_string());
                return;
            }
        };

        let id = inner.next_session_id;
        inner.next_session_id += 1;

        let device = Arc::downgrade(&self.shared);
        let coordinator = Arc::new(coordinator.with_error_hook(Box::new(move |reason: &str| {
            if let Some(shared) = Weak::upgrade(&device) {
                CaptureDevice { shared }.on_session_error(id, reason);
            }
        })));
        let shutdown = CancellationToken::new();

        inner.transition(DeviceState::Capturing {
            started_at: Instant::now(),
        });
        inner.session = Some(Session {
            id,
            coordinator: Arc::clone(&coordinator),
            shutdown: shutdown.clone(),
        });
        drop(inner);

        let params = coordinator.params();
        info!(
            "Capture session {} started on {}: {} @ {} fps, {:?}",
            id,
            self.shared.machine.name(),
            params.requested_frame_size,
            params.frame_rate,
            params.pixel_format
        );

        self.spawn_machine(Arc::clone(&coordinator), shutdown.clone());
        self.spawn_health_log(id, coordinator, shutdown);
    }

    fn spawn_machine(&self, coordinator: Arc<CaptureCoordinator>, shutdown: CancellationToken) {
        let machine = Arc::clone(&self.shared.machine);
        self.shared.runtime.spawn(async move {
            if let Err(e) = machine.start(Arc::clone(&coordinator)).await {
                let err = CaptureError::MachineStartFailed(format!("{:#}", e));
                coordinator.report_error(&err.to_string());
            }

            // stop always runs after start has returned
            shutdown.cancelled().await;
            machine.stop(coordinator).await;
            debug!("{} stopped", machine.name());
        });
    }

    fn spawn_health_log(
        &self,
        id: u64,
        coordinator: Arc<CaptureCoordinator>,
        shutdown: CancellationToken,
    ) {
        let period = self.shared.config.health_log_interval();
        self.shared.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        info!("Capture session {}: {}", id, coordinator.health().summary());
                    }
                }
            }
        });
    }

    /// End the current session and return to idle.
    ///
    /// Also acknowledges a failed session. Does not wait for the machine to
    /// stop. No-op when idle.
    pub fn stop_and_deallocate(&self) {
        let mut inner = self.lock();
        let state = inner.state;
        if state.is_idle() {
            return;
        }

        let session = inner.session.take();
        inner.transition(DeviceState::Idle);
        drop(inner);

        if let Some(session) = session {
            info!(
                "Capture session {} stopped after {:?}: {}",
                session.id,
                state.capturing_duration().unwrap_or_default(),
                session.coordinator.health().summary()
            );
            Self::teardown(session);
        } else {
            debug!("Device acknowledged from {}", state);
        }
    }

    /// Fail the current session: the client hears `reason` once, the device
    /// moves to `Error` and the session is torn down.
    ///
    /// No-op unless capturing.
    pub fn report_error(&self, reason: &str) {
        let session = {
            let mut inner = self.lock();
            if !inner.state.is_capturing() {
                debug!("Ignoring error while {}: {}", inner.state, reason);
                return;
            }
            inner.transition(DeviceState::Error);
            inner.session.take()
        };

        if let Some(session) = session {
            // the error hook finds the device already failed and returns
            session.coordinator.report_error(reason);
            Self::teardown(session);
        }
    }

    // Called by the coordinator's error hook after the client was told.
    fn on_session_error(&self, id: u64, reason: &str) {
        let session = {
            let mut inner = self.lock();
            let current = inner.session.as_ref().map(|s| s.id);
            if current != Some(id) || !inner.state.is_capturing() {
                return;
            }
            inner.transition(DeviceState::Error);
            inner.session.take()
        };

        if let Some(session) = session {
            warn!("Capture session {} failed: {}", id, reason);
            Self::teardown(session);
        }
    }

    fn teardown(session: Session) {
        session.coordinator.stop();
        session.shutdown.cancel();
    }

    pub fn state(&self) -> DeviceState {
        self.lock().state
    }

    /// Coordinator of the running session, if any
    pub fn coordinator(&self) -> Option<Arc<CaptureCoordinator>> {
        self.lock().session.as_ref().map(|s| Arc::clone(&s.coordinator))
    }

    pub fn machine_name(&self) -> &'static str {
        self.shared.machine.name()
    }
}
