//! Reusable byte-buffer pool for the send path.
//!
//! Every outbound message is encoded into a pooled buffer that returns to
//! the pool when the [`PooledBuf`] guard drops, so release happens on every
//! path, early returns included. The free list is bounded: under a burst,
//! buffers beyond the bound are plain allocations that get dropped instead
//! of pooled — acquire never blocks and never fails.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

struct PoolInner {
    /// Buffers below this capacity are not worth keeping.
    buf_size: usize,
    /// Upper bound on the free list.
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl PoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() < self.buf_size {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().expect("pool free list poisoned");
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

/// A bounded pool of byte buffers sized for one message class.
///
/// Cheap to clone; clones share the same free list. Safe to use from the
/// main loop and any send-side task concurrently.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool whose buffers hold `buf_size` bytes, keeping at most
    /// `max_pooled` of them around between uses.
    pub fn new(buf_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buf_size,
                max_pooled,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Acquires an empty buffer with room for at least `size_hint` bytes.
    ///
    /// Contents beyond the logical length are whatever a previous user
    /// left there; only read what you wrote.
    pub fn acquire(&self, size_hint: usize) -> PooledBuf {
        let reused = self.inner.free.lock().expect("pool free list poisoned").pop();
        let buf = match reused {
            Some(buf) => buf,
            None => Vec::with_capacity(size_hint.max(self.inner.buf_size)),
        };
        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }
}

/// A buffer on loan from a [`BufferPool`]; returns itself on drop.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
