use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::oracle::types::{PixelFormat, Size};

/// Bounded pool of frame buffers.
///
/// At most `capacity` buffers can be reserved at once. Reservation never
/// waits: it fails immediately when every buffer is in use. A reserved
/// `FrameBuffer` goes back to the pool when it is dropped, wherever that
/// happens (early rejection, failed capture, or after the consumer is done).
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    capacity: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    free: VecDeque<BytesMut>,
    in_use: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put(&self, mut data: BytesMut) {
        let mut inner = self.lock();
        inner.in_use = inner.in_use.saturating_sub(1);
        // Only keep storage around for slots that can actually be reused
        if inner.free.len() < self.capacity {
            data.clear();
            inner.free.push_back(data);
        }
    }
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                capacity,
                inner: Mutex::new(PoolInner {
                    free: VecDeque::with_capacity(capacity),
                    in_use: 0,
                }),
            }),
        }
    }

    /// Take a writable buffer sized for one frame, or `None` if the pool is exhausted.
    pub fn try_reserve(&self, format: PixelFormat, size: Size) -> Option<FrameBuffer> {
        let mut inner = self.shared.lock();
        if inner.in_use >= self.shared.capacity {
            return None;
        }
        inner.in_use += 1;
        let mut data = inner.free.pop_front().unwrap_or_default();
        drop(inner);

        data.resize(format.frame_bytes(size), 0);
        Some(FrameBuffer {
            data,
            format,
            size,
            pool: Some(Arc::clone(&self.shared)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffers currently reserved.
    pub fn in_use(&self) -> usize {
        self.shared.lock().in_use
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_use())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A frame buffer reserved from a `BufferPool`.
pub struct FrameBuffer {
    data: BytesMut,
    format: PixelFormat,
    size: Size,
    pool: Option<Arc<PoolShared>>,
}

impl FrameBuffer {
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("format", &self.format)
            .field("size", &self.size)
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}
