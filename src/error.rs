use thiserror::Error;

use crate::oracle::types::{PixelFormat, Size};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("requested frame size {requested} is below the minimum {min}")]
    FrameSizeTooSmall { requested: Size, min: Size },

    #[error("maximum frame size {max} is below the minimum {min}")]
    MaxFrameSizeTooSmall { max: Size, min: Size },

    #[error("capture machine failed to start: {0}")]
    MachineStartFailed(String),

    #[error("capture source lost: {0}")]
    SourceLost(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}
