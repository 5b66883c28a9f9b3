//! Frame capture scheduling
//!
//! Decides which content-change and timer events become captured frames,
//! keeps delivered frames strictly ordered, and manages the lifecycle of a
//! capture device.

pub mod assets;
pub mod capture;
pub mod config;
pub mod error;
pub mod oracle;
pub mod pipeline;

pub use capture::{CaptureClient, PooledClient};
pub use config::OracleConfig;
pub use error::{CaptureError, ConfigError};
pub use oracle::{
    CaptureOracle, CaptureParams, EventKind, PixelFormat, ResolutionChangePolicy, Size,
};
pub use pipeline::{CaptureCoordinator, CaptureDevice, CaptureMachine, DeviceState};
