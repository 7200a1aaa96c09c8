//! Bounded buffer pool.
//!
//! A fixed number of fixed-size byte buffers allocated once at driver
//! start. `allocate` blocks up to a caller-supplied timeout waiting for a
//! free slot; `release` returns a buffer and wakes exactly one blocked
//! allocator. Ownership of a [`Buffer`] is exclusive and moves with it:
//! caller → TX list → transport → RX list → caller → pool.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::error::{Error, Result};

/// What a buffer currently carries. Purely a routing/accounting tag; the
/// pool treats all kinds identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Command,
    Response,
    Event,
}

/// An owned byte region checked out of a [`BufferPool`].
#[derive(Debug)]
pub struct Buffer {
    kind: BufferKind,
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Bytes currently considered valid.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Full backing capacity, regardless of the current length.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Overwrite the buffer contents. Fails with `AllocationFailed` if
    /// `bytes` exceeds the backing capacity.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.data.len() {
            return Err(Error::AllocationFailed);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// Mutable access to the backing storage plus a setter for the valid
    /// length, for callers that encode in place.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len.min(self.data.len());
    }

    pub fn set_kind(&mut self, kind: BufferKind) {
        self.kind = kind;
    }
}

struct PoolState {
    free: Vec<Box<[u8]>>,
    outstanding: usize,
}

/// Fixed-capacity buffer pool shared by caller threads and the bus thread.
pub struct BufferPool {
    state: Mutex<PoolState>,
    available: Condvar,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let free = (0..capacity)
            .map(|_| vec![0u8; buffer_size].into_boxed_slice())
            .collect();
        Self {
            state: Mutex::new(PoolState {
                free,
                outstanding: 0,
            }),
            available: Condvar::new(),
            buffer_size,
            capacity,
        }
    }

    /// Check out a buffer, blocking up to `timeout` for a free slot.
    ///
    /// Fails immediately with `AllocationFailed` if `size` exceeds the
    /// pool's buffer size, and after `timeout` if the pool stays
    /// exhausted. No side effects on failure.
    pub fn allocate(&self, kind: BufferKind, size: usize, timeout: Duration) -> Result<Buffer> {
        if size > self.buffer_size {
            warn!(
                "pool: request for {size} B exceeds buffer size {}",
                self.buffer_size
            );
            return Err(Error::AllocationFailed);
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if let Some(data) = state.free.pop() {
                state.outstanding += 1;
                return Ok(Buffer { kind, data, len: 0 });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("pool: exhausted, allocation timed out");
                return Err(Error::AllocationFailed);
            }
            let (guard, result) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
            if result.timed_out() && state.free.is_empty() {
                warn!("pool: exhausted, allocation timed out");
                return Err(Error::AllocationFailed);
            }
        }
    }

    /// Return a buffer to the pool and wake one blocked allocator.
    pub fn release(&self, buffer: Buffer) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.free.push(buffer.data);
        state.outstanding = state.outstanding.saturating_sub(1);
        drop(state);
        // Exactly one waiter gets the freed slot.
        self.available.notify_one();
    }

    /// Buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outstanding
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocate_and_release_cycle() {
        let pool = BufferPool::new(2, 64);
        let a = pool.allocate(BufferKind::Command, 10, Duration::from_millis(10)).unwrap();
        let b = pool.allocate(BufferKind::Response, 10, Duration::from_millis(10)).unwrap();
        assert_eq!(pool.outstanding(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn oversized_request_fails_immediately() {
        let pool = BufferPool::new(1, 32);
        let start = Instant::now();
        let err = pool
            .allocate(BufferKind::Command, 64, Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err, Error::AllocationFailed);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = BufferPool::new(1, 32);
        let held = pool.allocate(BufferKind::Command, 8, Duration::from_millis(10)).unwrap();
        let start = Instant::now();
        let err = pool
            .allocate(BufferKind::Command, 8, Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err, Error::AllocationFailed);
        assert!(start.elapsed() >= Duration::from_millis(50));
        pool.release(held);
    }

    #[test]
    fn release_unblocks_pending_allocator() {
        let pool = Arc::new(BufferPool::new(1, 32));
        let held = pool.allocate(BufferKind::Command, 8, Duration::from_millis(10)).unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                pool.allocate(BufferKind::Response, 8, Duration::from_secs(2))
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        pool.release(held);

        let got = waiter.join().unwrap();
        assert!(got.is_ok());
    }

    #[test]
    fn fill_respects_capacity() {
        let pool = BufferPool::new(1, 4);
        let mut buf = pool.allocate(BufferKind::Command, 4, Duration::from_millis(10)).unwrap();
        assert!(buf.fill(&[1, 2, 3, 4]).is_ok());
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(buf.fill(&[0; 5]), Err(Error::AllocationFailed));
    }
}
