use std::time::Duration;

pub const FRAME_RATE: f64 = 30.0;
pub const FRAME_WIDTH: u32 = 1920;
pub const FRAME_HEIGHT: u32 = 1080;

// smallest frame the downstream pixel formats accept
pub const MIN_FRAME_WIDTH: u32 = 2;
pub const MIN_FRAME_HEIGHT: u32 = 2;

/// Number of extra captures of static content taken before polling goes dormant.
pub const REDUNDANT_CAPTURE_GOAL: u32 = 200;

/// Token bucket capacity, in capture periods.
pub const TOKEN_BUCKET_PERIODS: f64 = 1.5;

/// Silence, in capture periods, after which a timer poll triggers a capture.
pub const OVERDUE_POLL_PERIODS: u32 = 4;

// reference client
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DELIVERY_CHANNEL_CAPACITY: usize = 16;

pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);
