//! Consumer side of the capture core

use log::{error, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

use super::frame_pool::{BufferPool, FrameBuffer};
use crate::oracle::types::{PixelFormat, Size};

/// The party that owns the frame buffers and consumes delivered frames.
///
/// Implementations must never block: `try_reserve` answers immediately and
/// `deliver`/`on_error` only hand work off.
pub trait CaptureClient: Send + Sync {
    /// Reserve a buffer for one frame, or `None` when none is free.
    fn try_reserve(&self, format: PixelFormat, size: Size) -> Option<FrameBuffer>;

    /// Receive a captured frame that passed ordering checks.
    fn deliver(&self, buffer: FrameBuffer, format: PixelFormat, size: Size, timestamp: Instant);

    /// Terminal error of the current session. Called at most once per session.
    fn on_error(&self, reason: &str);
}

/// A frame handed to the consumer.
#[derive(Debug)]
pub struct DeliveredFrame {
    pub buffer: FrameBuffer,
    pub format: PixelFormat,
    pub size: Size,
    pub timestamp: Instant,
}

/// Client backed by a `BufferPool` that forwards frames over a channel.
///
/// A delivered frame keeps its pool slot until the receiver drops it, so a
/// slow consumer shows up as failed reservations upstream.
pub struct PooledClient {
    pool: BufferPool,
    tx: mpsc::Sender<DeliveredFrame>,
    errors: Mutex<Vec<String>>,
    delivered: AtomicU64,
    overflowed: AtomicU64,
}

impl PooledClient {
    pub fn new(
        pool_size: usize,
        channel_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<DeliveredFrame>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let client = Arc::new(Self {
            pool: BufferPool::new(pool_size),
            tx,
            errors: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        });
        (client, rx)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Frames successfully queued to the receiver.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames lost because the channel was full or closed.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CaptureClient for PooledClient {
    fn try_reserve(&self, format: PixelFormat, size: Size) -> Option<FrameBuffer> {
        self.pool.try_reserve(format, size)
    }

    fn deliver(&self, buffer: FrameBuffer, format: PixelFormat, size: Size, timestamp: Instant) {
        let frame = DeliveredFrame {
            buffer,
            format,
            size,
            timestamp,
        };
        match self.tx.try_send(frame) {
            Ok(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let overflowed = self.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
                // Log every 30 drops to avoid spam
                if overflowed % 30 == 1 {
                    warn!("Delivery channel full, {} frames lost", overflowed);
                }
            }
        }
    }

    fn on_error(&self, reason: &str) {
        error!("Capture error: {}", reason);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reason.to_string());
    }
}
