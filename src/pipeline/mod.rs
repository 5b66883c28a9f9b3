//! Capture session pipeline
//!
//! Separates the concerns of a capture session:
//! - Decision: the coordinator couples oracle sampling with buffer reservation
//! - Lifecycle: the device owns the Idle/Capturing/Error state machine
//! - Production: capture machines feed events and complete captures
//! - Health: counters and periodic monitoring

pub mod coordinator;
pub mod device;
pub mod health;
pub mod machine;
pub mod state;

pub use coordinator::{CaptureCoordinator, CompletionToken, Decision, DropReason, InFlightCapture};
pub use device::CaptureDevice;
pub use health::{CaptureHealth, HealthAlert, HealthMonitor, HealthSummary};
pub use machine::CaptureMachine;
pub use state::DeviceState;
