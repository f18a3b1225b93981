//! Per-channel output buffer pool.
//!
//! Fixed-size slabs sized to the max fragment size. The guaranteed
//! count is pre-allocated at activation; the pool may grow to the
//! configured ceiling, after which `acquire` reports `NoBuffers` and
//! the caller retries once a flush returns buffers. Pool exhaustion is
//! always an error, never a hidden allocation.

use std::sync::Mutex;

use bytes::BytesMut;

use crate::error::{ChannelError, Result};

#[derive(Debug)]
struct PoolState {
    free: Vec<BytesMut>,
    created: usize,
    in_use: usize,
    peak_in_use: usize,
    max: usize,
}

/// Fixed-slab buffer pool.
///
/// The mutex serializes the rare cross-thread paths (statistics,
/// ioctl); the owning channel does the hot acquire/release.
#[derive(Debug)]
pub struct BufferPool {
    slab_size: usize,
    state: Mutex<PoolState>,
}

/// A point-in-time view of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out right now.
    pub in_use: usize,
    /// Most buffers ever out at once.
    pub peak_in_use: usize,
    /// Buffers ever created.
    pub created: usize,
    /// Growth ceiling.
    pub max: usize,
}

impl BufferPool {
    /// Create a pool with `guaranteed` slabs pre-allocated and growth
    /// up to `max` (0 pins the pool at the guaranteed count).
    #[must_use]
    pub fn new(slab_size: usize, guaranteed: usize, max: usize) -> Self {
        let max = if max == 0 { guaranteed } else { max.max(guaranteed) };
        let free = (0..guaranteed).map(|_| BytesMut::with_capacity(slab_size)).collect();
        Self {
            slab_size,
            state: Mutex::new(PoolState {
                free,
                created: guaranteed,
                in_use: 0,
                peak_in_use: 0,
                max,
            }),
        }
    }

    /// Slab capacity, equal to the max fragment size.
    #[must_use]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Take a cleared buffer.
    ///
    /// # Errors
    ///
    /// `ChannelError::NoBuffers` once `max` buffers are out.
    pub fn acquire(&self) -> Result<BytesMut> {
        let mut state = self.state.lock().map_err(|_| ChannelError::Closed)?;
        let buf = if let Some(mut buf) = state.free.pop() {
            buf.clear();
            buf
        } else if state.created < state.max {
            state.created += 1;
            BytesMut::with_capacity(self.slab_size)
        } else {
            return Err(ChannelError::NoBuffers);
        };
        state.in_use += 1;
        state.peak_in_use = state.peak_in_use.max(state.in_use);
        Ok(buf)
    }

    /// Return a buffer.
    ///
    /// Tolerates arriving after the owning channel went inactive; the
    /// buffer is simply kept for the next user or dropped with the
    /// pool.
    pub fn release(&self, buf: BytesMut) {
        if let Ok(mut state) = self.state.lock() {
            state.in_use = state.in_use.saturating_sub(1);
            if state.free.len() < state.max {
                state.free.push(buf);
            }
        }
    }

    /// Usage counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.state.lock().map_or(
            PoolStats { in_use: 0, peak_in_use: 0, created: 0, max: 0 },
            |state| PoolStats {
                in_use: state.in_use,
                peak_in_use: state.peak_in_use,
                created: state.created,
                max: state.max,
            },
        )
    }

    /// Reset the peak-usage counter (ioctl surface).
    pub fn reset_peak(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.peak_in_use = state.in_use;
        }
    }

    /// Raise or lower the growth ceiling (ioctl surface). The ceiling
    /// never drops below the guaranteed allocation.
    pub fn set_max(&self, max: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.max = max.max(state.free.len() + state.in_use);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_reports_no_buffers() {
        let pool = BufferPool::new(64, 2, 0);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.acquire().unwrap_err(), ChannelError::NoBuffers);

        pool.release(a);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn release_after_acquire_leaves_pool_unchanged() {
        let pool = BufferPool::new(64, 4, 0);
        let before = pool.stats();
        let buf = pool.acquire().unwrap();
        pool.release(buf);
        let after = pool.stats();
        assert_eq!(before.in_use, after.in_use);
        assert_eq!(before.created, after.created);
    }

    #[test]
    fn peak_counter_tracks_and_resets() {
        let pool = BufferPool::new(64, 4, 0);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.stats().peak_in_use, 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().peak_in_use, 2);
        pool.reset_peak();
        assert_eq!(pool.stats().peak_in_use, 0);
    }

    #[test]
    fn pool_grows_to_the_ceiling() {
        let pool = BufferPool::new(64, 1, 3);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let _c = pool.acquire().unwrap();
        assert_eq!(pool.acquire().unwrap_err(), ChannelError::NoBuffers);
        assert_eq!(pool.stats().created, 3);
    }
}
