//! Capture machine trait
//!
//! The capture machine is the platform side of a session: it observes paints,
//! compositor frames, cursor moves and timer ticks, feeds them to the
//! coordinator, fills the frames it is handed and completes them.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::coordinator::CaptureCoordinator;

/// Trait for event sources that drive a capture session
#[async_trait]
pub trait CaptureMachine: Send + Sync {
    /// Start producing events for `coordinator`.
    ///
    /// Runtime failures after a successful start are reported through
    /// `CaptureCoordinator::report_error`.
    async fn start(&self, coordinator: Arc<CaptureCoordinator>) -> Result<()>;

    /// Stop producing events for the session driven by `coordinator`.
    ///
    /// Called once per session, after its `start` returned. Sessions of one
    /// machine may overlap, so this must leave other sessions running.
    async fn stop(&self, coordinator: Arc<CaptureCoordinator>);

    /// Get the name of this machine for logging
    fn name(&self) -> &'static str;
}
