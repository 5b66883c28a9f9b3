//! Capture decision engine
//!
//! - `sampler`: token bucket rate limiting of content events
//! - `oracle`: frame numbering and delivery ordering on top of the sampler
//! - `types`: events, sizes, pixel formats and session parameters

#[allow(clippy::module_inception)]
pub mod oracle;
pub mod sampler;
pub mod types;

pub use oracle::CaptureOracle;
pub use sampler::EventSampler;
pub use types::{CaptureParams, Event, EventKind, PixelFormat, ResolutionChangePolicy, Size};
