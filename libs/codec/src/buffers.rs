//! # BufferPool - Pooled Wire Buffers
//!
//! Fixed-size byte buffers checked out for frame assembly and released back
//! after the transport is done with them. Checkout never blocks: a miss
//! allocates a fresh buffer and bumps the allocated counter. Releases never
//! fail: a truncated multi-buffer tail is restored to full size, while a
//! foreign wrong-sized buffer, or a release into a full pool, is counted as
//! dropped and left to the allocator.
//!
//! The accounting invariant, checked by the tests, is
//! `allocated == in_pool + outstanding + dropped` at every observation
//! point. A foreign (wrong-sized) buffer enters the ledger as
//! allocated-and-dropped in one step so the invariant survives it.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::debug;

use config::MessagingConfiguration;

/// Concurrent pool of fixed-size byte buffers.
pub struct BufferPool {
    buffer_size: usize,
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    allocated: AtomicUsize,
    outstanding: AtomicUsize,
    dropped: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte buffers, retaining at most
    /// `max_pooled` free buffers (0 = unbounded), with `preallocation`
    /// buffers created up front.
    pub fn new(buffer_size: usize, max_pooled: usize, preallocation: usize) -> Self {
        let (free_tx, free_rx) = if max_pooled == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(max_pooled)
        };
        let pool = Self {
            buffer_size,
            free_tx,
            free_rx,
            allocated: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        };
        for _ in 0..preallocation {
            let buffer = pool.allocate();
            // Preallocated buffers go straight into the free list.
            if pool.free_tx.try_send(buffer).is_err() {
                pool.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(
            buffer_size,
            max_pooled, preallocation, "buffer pool initialized"
        );
        pool
    }

    pub fn from_config(config: &MessagingConfiguration) -> Self {
        Self::new(
            config.buffer_pool_buffer_size,
            config.buffer_pool_max_size,
            config.buffer_pool_preallocation_size,
        )
    }

    fn allocate(&self) -> Vec<u8> {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        vec![0u8; self.buffer_size]
    }

    /// Check out one full-size buffer. Never blocks; allocates on miss.
    pub fn get_buffer(&self) -> Vec<u8> {
        let buffer = match self.free_rx.try_recv() {
            Ok(buffer) => buffer,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => self.allocate(),
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    /// Check out enough buffers to hold `total_size` bytes. All segments are
    /// pool-sized except the last, which is truncated to the remainder.
    pub fn get_multi_buffer(&self, total_size: usize) -> Vec<Vec<u8>> {
        let mut segments = Vec::with_capacity(total_size.div_ceil(self.buffer_size.max(1)));
        let mut remaining = total_size;
        while remaining > 0 {
            let mut buffer = self.get_buffer();
            if remaining < self.buffer_size {
                buffer.truncate(remaining);
            }
            remaining -= buffer.len();
            segments.push(buffer);
        }
        segments
    }

    /// Return a buffer to the pool. A truncated segment from
    /// [`get_multi_buffer`](Self::get_multi_buffer) keeps its full capacity,
    /// so it is restored and repooled. Any other wrong-sized buffer, or a
    /// release into a full pool, is counted as dropped, never an error.
    pub fn release(&self, mut buffer: Vec<u8>) {
        if buffer.len() < self.buffer_size && buffer.capacity() >= self.buffer_size {
            buffer.resize(self.buffer_size, 0);
        }
        if buffer.len() != self.buffer_size {
            // A buffer this pool never produced: absorb it into the ledger
            // and drop it in one step.
            self.allocated.fetch_add(1, Ordering::Relaxed);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.check_in(buffer);
    }

    /// Return multi-buffer segments.
    pub fn release_multi(&self, segments: Vec<Vec<u8>>) {
        for buffer in segments {
            self.release(buffer);
        }
    }

    fn check_in(&self, buffer: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        match self.free_tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers created by this pool (plus foreign buffers absorbed on
    /// release)
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers currently on the free list
    pub fn in_pool(&self) -> usize {
        self.free_rx.len()
    }

    /// Buffers checked out and not yet returned
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Buffers permanently lost to the pool
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(pool: &BufferPool) {
        assert_eq!(
            pool.allocated(),
            pool.in_pool() + pool.outstanding() + pool.dropped(),
            "allocated == in_pool + outstanding + dropped"
        );
    }

    #[test]
    fn test_checkout_release_cycle() {
        let pool = BufferPool::new(1024, 10, 0);
        assert_invariant(&pool);

        let buffer = pool.get_buffer();
        assert_eq!(buffer.len(), 1024);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.outstanding(), 1);
        assert_invariant(&pool);

        pool.release(buffer);
        assert_eq!(pool.in_pool(), 1);
        assert_eq!(pool.outstanding(), 0);
        assert_invariant(&pool);

        // Reuse hits the free list instead of allocating.
        let _again = pool.get_buffer();
        assert_eq!(pool.allocated(), 1);
        assert_invariant(&pool);
    }

    #[test]
    fn test_preallocation() {
        let pool = BufferPool::new(512, 100, 25);
        assert_eq!(pool.in_pool(), 25);
        assert_eq!(pool.allocated(), 25);
        assert_invariant(&pool);
    }

    #[test]
    fn test_multi_buffer_split() {
        let pool = BufferPool::new(1024, 10, 0);
        let segments = pool.get_multi_buffer(2500);
        let lengths: Vec<usize> = segments.iter().map(|s| s.len()).collect();
        assert_eq!(lengths, vec![1024, 1024, 452]);
        assert_invariant(&pool);

        pool.release_multi(segments);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.in_pool(), 3);
        assert_invariant(&pool);
    }

    #[test]
    fn test_truncated_tail_restored_through_plain_release() {
        let pool = BufferPool::new(1024, 10, 0);
        let segments = pool.get_multi_buffer(1500);

        // The tail goes back through release(), not release_multi().
        for buffer in segments {
            pool.release(buffer);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.in_pool(), 2);
        assert_invariant(&pool);

        // Both repooled buffers come back at full size.
        assert_eq!(pool.get_buffer().len(), 1024);
        assert_eq!(pool.get_buffer().len(), 1024);
    }

    #[test]
    fn test_wrong_size_release_is_dropped_silently() {
        let pool = BufferPool::new(1024, 10, 0);
        pool.release(vec![0u8; 999]);
        assert_eq!(pool.dropped(), 1);
        assert_eq!(pool.in_pool(), 0);
        assert_invariant(&pool);
    }

    #[test]
    fn test_full_pool_drops_release() {
        let pool = BufferPool::new(64, 1, 0);
        let a = pool.get_buffer();
        let b = pool.get_buffer();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.in_pool(), 1);
        assert_eq!(pool.dropped(), 1);
        assert_invariant(&pool);
    }

    #[test]
    fn test_unbounded_pool() {
        let pool = BufferPool::new(64, 0, 0);
        let buffers: Vec<_> = (0..100).map(|_| pool.get_buffer()).collect();
        for buffer in buffers {
            pool.release(buffer);
        }
        assert_eq!(pool.in_pool(), 100);
        assert_eq!(pool.dropped(), 0);
        assert_invariant(&pool);
    }
}
