//! Reusable part buffers for streamed uploads.
//!
//! Every buffer handed out has a capacity of at least the pool's part size.
//! A [`PooledBuffer`] goes back to the pool when it is dropped, so a part
//! that faults half way still returns its buffer.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            max_idle,
            idle: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
        })
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Buffers allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Takes an empty buffer out of the pool, allocating one if none is idle.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        let reused = self.idle.lock().pop();
        let buffer = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Vec::with_capacity(self.capacity)
        });

        PooledBuffer {
            pool: Arc::clone(self),
            buffer,
        }
    }

    fn give_back(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < self.capacity {
            return;
        }
        buffer.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }
}

/// A buffer checked out of a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    buffer: Vec<u8>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.give_back(buffer);
    }
}
