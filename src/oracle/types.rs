//! Core types shared by the sampler, the oracle and the coordinator

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::assets::{FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH, OVERDUE_POLL_PERIODS};
use crate::config::OracleConfig;
use crate::error::CaptureError;

/// Kind of event reported by the capture machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Periodic timer tick used to poll static or unreliable sources
    TimerPoll,
    /// The compositor produced a new frame
    CompositorUpdate,
    /// A software paint touched the captured surface
    SoftwarePaint,
    /// The mouse cursor moved or changed shape
    MouseCursorUpdate,
    /// The consumer explicitly asked for a refresh
    ActiveRefreshRequest,
}

impl EventKind {
    /// Whether this event means the captured content changed
    pub fn is_dirty(&self) -> bool {
        matches!(self, EventKind::CompositorUpdate | EventKind::SoftwarePaint)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::TimerPoll => write!(f, "TimerPoll"),
            EventKind::CompositorUpdate => write!(f, "CompositorUpdate"),
            EventKind::SoftwarePaint => write!(f, "SoftwarePaint"),
            EventKind::MouseCursorUpdate => write!(f, "MouseCursorUpdate"),
            EventKind::ActiveRefreshRequest => write!(f, "ActiveRefreshRequest"),
        }
    }
}

/// A timestamped event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub time: Instant,
}

impl Event {
    pub fn new(kind: EventKind, time: Instant) -> Self {
        Self { kind, time }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether both dimensions fit inside `other`
    pub fn fits_within(&self, other: &Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Round both dimensions down to the nearest even value
    pub fn even_floor(&self) -> Size {
        Size::new(self.width & !1, self.height & !1)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    I420,
    NativeTexture,
}

impl PixelFormat {
    /// Bytes needed to hold one frame of `size` in this format
    pub fn frame_bytes(&self, size: Size) -> usize {
        match self {
            // full luma plane plus two quarter chroma planes
            PixelFormat::I420 => {
                let luma = size.area() as usize;
                let chroma = (size.width as usize).div_ceil(2) * (size.height as usize).div_ceil(2);
                luma + 2 * chroma
            }
            // backed by a GPU texture, nothing to copy into CPU memory
            PixelFormat::NativeTexture => 0,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::I420 => write!(f, "I420"),
            PixelFormat::NativeTexture => write!(f, "NativeTexture"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionChangePolicy {
    /// Output size is decided once, on the first source size report
    Fixed,
    /// Output follows the source but keeps the first computed aspect ratio
    FixedAspectRatio,
    /// Output follows the source size up to the maximum
    AnyWithinLimit,
}

impl ResolutionChangePolicy {
    pub fn allows_variable_resolution(&self) -> bool {
        !matches!(self, ResolutionChangePolicy::Fixed)
    }
}

/// Parameters of a capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    pub requested_frame_size: Size,
    pub max_frame_size: Size,
    pub frame_rate: f64,
    pub pixel_format: PixelFormat,
    pub resolution_change_policy: ResolutionChangePolicy,
}

impl Default for CaptureParams {
    fn default() -> Self {
        let size = Size::new(FRAME_WIDTH, FRAME_HEIGHT);
        Self {
            requested_frame_size: size,
            max_frame_size: size,
            frame_rate: FRAME_RATE,
            pixel_format: PixelFormat::I420,
            resolution_change_policy: ResolutionChangePolicy::FixedAspectRatio,
        }
    }
}

impl CaptureParams {
    /// Check the parameters against what this build can capture
    pub fn validate(&self, config: &OracleConfig) -> Result<(), CaptureError> {
        if period_for(self.frame_rate).is_none() {
            return Err(CaptureError::InvalidFrameRate(self.frame_rate));
        }
        if self.pixel_format == PixelFormat::NativeTexture && !config.native_texture_supported {
            return Err(CaptureError::UnsupportedPixelFormat(self.pixel_format));
        }
        let min = config.min_frame_size;
        if !min.fits_within(&self.requested_frame_size) {
            return Err(CaptureError::FrameSizeTooSmall {
                requested: self.requested_frame_size,
                min,
            });
        }
        if !min.fits_within(&self.max_frame_size) {
            return Err(CaptureError::MaxFrameSizeTooSmall {
                max: self.max_frame_size,
                min,
            });
        }
        Ok(())
    }

    /// Reciprocal of the frame rate
    ///
    /// Only meaningful once `validate` has accepted the parameters; an
    /// unusable rate yields `Duration::MAX`.
    pub fn capture_period(&self) -> Duration {
        period_for(self.frame_rate).unwrap_or(Duration::MAX)
    }
}

// A usable period is nonzero and leaves room for the overdue poll window.
fn period_for(frame_rate: f64) -> Option<Duration> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frame_rate)
        .ok()
        .filter(|period| !period.is_zero())
        .filter(|period| period.checked_mul(OVERDUE_POLL_PERIODS).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_kinds() {
        assert!(EventKind::CompositorUpdate.is_dirty());
        assert!(EventKind::SoftwarePaint.is_dirty());
        assert!(!EventKind::TimerPoll.is_dirty());
        assert!(!EventKind::MouseCursorUpdate.is_dirty());
        assert!(!EventKind::ActiveRefreshRequest.is_dirty());
    }

    #[test]
    fn test_even_floor() {
        assert_eq!(Size::new(641, 479).even_floor(), Size::new(640, 478));
        assert_eq!(Size::new(640, 480).even_floor(), Size::new(640, 480));
    }

    #[test]
    fn test_i420_frame_bytes() {
        assert_eq!(PixelFormat::I420.frame_bytes(Size::new(4, 4)), 16 + 2 * 4);
        // odd sizes round the chroma planes up
        assert_eq!(PixelFormat::I420.frame_bytes(Size::new(3, 3)), 9 + 2 * 4);
    }

    #[test]
    fn test_validate_frame_rate() {
        let config = OracleConfig::default();
        let mut params = CaptureParams::default();
        assert!(params.validate(&config).is_ok());

        params.frame_rate = -2.0;
        assert!(matches!(
            params.validate(&config),
            Err(CaptureError::InvalidFrameRate(_))
        ));

        params.frame_rate = 0.0;
        assert!(params.validate(&config).is_err());

        params.frame_rate = f64::NAN;
        assert!(params.validate(&config).is_err());
    }

    #[test]
    fn test_validate_extreme_frame_rates() {
        let config = OracleConfig::default();

        // periods too long to represent, or too long for the overdue window
        for frame_rate in [1e-30, 1e-19, f64::MIN_POSITIVE] {
            let params = CaptureParams {
                frame_rate,
                ..CaptureParams::default()
            };
            assert!(
                matches!(params.validate(&config), Err(CaptureError::InvalidFrameRate(_))),
                "frame rate {} accepted",
                frame_rate
            );
            assert_eq!(params.capture_period(), Duration::MAX);
        }

        // a period that rounds to zero nanoseconds
        let params = CaptureParams {
            frame_rate: 1e300,
            ..CaptureParams::default()
        };
        assert!(params.validate(&config).is_err());

        // one frame a day is slow but usable
        let params = CaptureParams {
            frame_rate: 1.0 / 86_400.0,
            ..CaptureParams::default()
        };
        assert!(params.validate(&config).is_ok());
        assert!((params.capture_period().as_secs_f64() - 86_400.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_pixel_format() {
        let mut config = OracleConfig::default();
        let params = CaptureParams {
            pixel_format: PixelFormat::NativeTexture,
            ..CaptureParams::default()
        };
        assert!(matches!(
            params.validate(&config),
            Err(CaptureError::UnsupportedPixelFormat(PixelFormat::NativeTexture))
        ));

        config.native_texture_supported = true;
        assert!(params.validate(&config).is_ok());
    }

    #[test]
    fn test_validate_frame_size_floor() {
        let config = OracleConfig::default();
        let params = CaptureParams {
            requested_frame_size: Size::new(1, 100),
            ..CaptureParams::default()
        };
        assert!(matches!(
            params.validate(&config),
            Err(CaptureError::FrameSizeTooSmall { .. })
        ));

        let params = CaptureParams {
            requested_frame_size: Size::new(2, 2),
            ..CaptureParams::default()
        };
        assert!(params.validate(&config).is_ok());
    }

    #[test]
    fn test_capture_period() {
        let params = CaptureParams {
            frame_rate: 4.0,
            ..CaptureParams::default()
        };
        assert_eq!(params.capture_period(), Duration::from_millis(250));
    }
}
