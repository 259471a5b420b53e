//! Datagram buffer pool shared by all listeners.
//!
//! Buffers are plain heap vectors recycled through a lock-free queue. A
//! buffer is owned by exactly one receive or handling task at a time and goes
//! back to the pool when its guard is dropped.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Largest datagram a listener reads.
pub const MAX_DATAGRAM: usize = 65536;

/// Number of idle buffers kept for reuse.
pub const POOL_SIZE: usize = 64;

pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
        })
    }

    /// Take a buffer of `MAX_DATAGRAM` bytes.
    ///
    /// Allocates when the pool is empty. A recycled buffer is resized back to
    /// full length since the previous user may have truncated it.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let mut buf = self.free.pop().unwrap_or_default();
        buf.resize(MAX_DATAGRAM, 0);
        PooledBuffer {
            pool: Arc::clone(self),
            buf,
            len: 0,
        }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    fn release(&self, buf: Vec<u8>) {
        // A full pool drops the buffer.
        let _ = self.free.push(buf);
    }
}

/// A buffer on loan from the pool.
///
/// Dereferences to the filled part, `[..len]`. Use `as_mut_full` to receive
/// into the whole buffer and `set_len` to record the datagram size.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    buf: Vec<u8>,
    len: usize,
}

impl PooledBuffer {
    pub fn as_mut_full(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buf.len());
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
