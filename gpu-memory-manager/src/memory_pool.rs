use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};

/// Budgeted device memory pool.
///
/// Every live [`DeviceBuffer`](crate::DeviceBuffer) holds one reservation in
/// the pool. Reservations are tracked by id so that the bytes in use can be
/// audited at any point, e.g. to check that a join released all of its
/// intermediate buffers before returning.
#[derive(Debug)]
pub struct DeviceMemoryPool {
    limit: usize,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    live: DashMap<u64, usize>,
}

impl DeviceMemoryPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            live: DashMap::new(),
        }
    }

    /// Reserve `bytes` from the budget, returning the allocation id.
    pub fn reserve(&self, bytes: usize) -> DeviceResult<u64> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            let available = self.limit.saturating_sub(current);
            if bytes > available {
                warn!(
                    "Device allocation of {} bytes rejected ({} bytes available)",
                    bytes, available
                );
                return Err(DeviceError::MemoryAllocation {
                    requested: bytes,
                    available,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.insert(id, bytes);
        debug!("Reserved allocation {} ({} bytes)", id, bytes);
        Ok(id)
    }

    /// Return an allocation's bytes to the budget.
    pub fn release(&self, id: u64) {
        match self.live.remove(&id) {
            Some((_, bytes)) => {
                self.in_use.fetch_sub(bytes, Ordering::AcqRel);
                debug!("Released allocation {} ({} bytes)", id, bytes);
            }
            None => warn!("Release of unknown allocation {}", id),
        }
    }

    /// Bytes currently reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of allocations that have not been released yet.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_track_bytes() {
        let pool = DeviceMemoryPool::new(1024);
        let a = pool.reserve(100).unwrap();
        let b = pool.reserve(200).unwrap();
        assert_eq!(pool.in_use(), 300);
        assert_eq!(pool.live_allocations(), 2);

        pool.release(a);
        assert_eq!(pool.in_use(), 200);
        pool.release(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.live_allocations(), 0);
    }

    #[test]
    fn over_budget_is_rejected() {
        let pool = DeviceMemoryPool::new(128);
        let _a = pool.reserve(100).unwrap();
        let err = pool.reserve(64).unwrap_err();
        assert_eq!(
            err,
            DeviceError::MemoryAllocation {
                requested: 64,
                available: 28
            }
        );
        assert_eq!(pool.in_use(), 100);
    }

    #[test]
    fn double_release_is_ignored() {
        let pool = DeviceMemoryPool::new(64);
        let a = pool.reserve(8).unwrap();
        pool.release(a);
        pool.release(a);
        assert_eq!(pool.in_use(), 0);
    }
}
