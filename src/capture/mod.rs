//! Buffers and consumers of captured frames
//!
//! The client side of a capture session: a bounded buffer pool, the
//! `CaptureClient` contract, and a simulated capture machine for driving a
//! session without a real display.

pub mod client;
pub mod frame_pool;
pub mod simulated;

pub use client::{CaptureClient, DeliveredFrame, PooledClient};
pub use frame_pool::{BufferPool, FrameBuffer};
pub use simulated::{SimulatedConfig, SimulatedMachine};
