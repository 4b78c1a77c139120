//! Owned device allocations.

use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DeviceError, DeviceResult};
use crate::memory_pool::DeviceMemoryPool;

/// Element type that can live in device memory.
///
/// Plain scalars are used for read-only data such as key columns. Atomic
/// types back buffers that many kernel threads write concurrently; their
/// `Host` type is what a device-to-host copy produces.
pub trait DeviceScalar: Send + Sync + 'static {
    type Host: Copy + Default + Send + Sync + 'static;

    fn from_host(value: Self::Host) -> Self;
    fn to_host(&self) -> Self::Host;
}

macro_rules! plain_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl DeviceScalar for $t {
                type Host = $t;

                #[inline]
                fn from_host(value: $t) -> Self {
                    value
                }

                #[inline]
                fn to_host(&self) -> $t {
                    *self
                }
            }
        )*
    };
}

macro_rules! atomic_scalar {
    ($($atomic:ty => $t:ty),* $(,)?) => {
        $(
            impl DeviceScalar for $atomic {
                type Host = $t;

                #[inline]
                fn from_host(value: $t) -> Self {
                    <$atomic>::new(value)
                }

                #[inline]
                fn to_host(&self) -> $t {
                    self.load(Ordering::Acquire)
                }
            }
        )*
    };
}

plain_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
atomic_scalar!(AtomicI32 => i32, AtomicI64 => i64, AtomicU32 => u32, AtomicU64 => u64);

/// Opaque device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A contiguous device allocation of `len` elements.
///
/// The allocation is reserved in the owning [`DeviceMemoryPool`] on creation
/// and returned to it exactly once when the buffer is dropped.
pub struct DeviceBuffer<T: DeviceScalar> {
    data: Box<[T]>,
    pool: Arc<DeviceMemoryPool>,
    allocation: u64,
}

impl<T: DeviceScalar> DeviceBuffer<T> {
    pub(crate) fn filled(
        pool: &Arc<DeviceMemoryPool>,
        len: usize,
        value: T::Host,
    ) -> DeviceResult<Self> {
        let allocation = pool.reserve(Self::bytes_for(len)?)?;
        let data = (0..len).map(|_| T::from_host(value)).collect();
        Ok(Self {
            data,
            pool: Arc::clone(pool),
            allocation,
        })
    }

    pub(crate) fn from_host(pool: &Arc<DeviceMemoryPool>, values: &[T::Host]) -> DeviceResult<Self> {
        let allocation = pool.reserve(Self::bytes_for(values.len())?)?;
        let data = values.iter().map(|&v| T::from_host(v)).collect();
        Ok(Self {
            data,
            pool: Arc::clone(pool),
            allocation,
        })
    }

    fn bytes_for(len: usize) -> DeviceResult<usize> {
        len.checked_mul(size_of::<T>()).ok_or_else(|| {
            DeviceError::InvalidValue(format!("allocation of {} elements overflows", len))
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len() * size_of::<T>()
    }

    pub fn device_ptr(&self) -> DevicePtr {
        DevicePtr(self.data.as_ptr() as u64)
    }

    /// Device-side view of the elements, for use inside kernels.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }
}

impl<T: DeviceScalar> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.pool.release(self.allocation);
    }
}

impl<T: DeviceScalar> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.device_ptr())
            .field("len", &self.len())
            .field("bytes", &self.byte_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_returns_reservation() {
        let pool = Arc::new(DeviceMemoryPool::new(1 << 20));
        {
            let buf = DeviceBuffer::<i64>::filled(&pool, 16, 7).unwrap();
            assert_eq!(buf.byte_len(), 128);
            assert_eq!(pool.in_use(), 128);
            assert!(buf.as_slice().iter().all(|&v| v == 7));
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn atomic_buffers_round_through_host_values() {
        let pool = Arc::new(DeviceMemoryPool::new(1 << 20));
        let buf = DeviceBuffer::<AtomicI32>::from_host(&pool, &[1, -1, 3]).unwrap();
        buf.as_slice()[1].store(9, Ordering::Relaxed);
        let host: Vec<i32> = buf.as_slice().iter().map(DeviceScalar::to_host).collect();
        assert_eq!(host, vec![1, 9, 3]);
    }

    #[test]
    fn oversized_buffer_fails_without_reserving() {
        let pool = Arc::new(DeviceMemoryPool::new(64));
        let err = DeviceBuffer::<u64>::filled(&pool, 9, 0).unwrap_err();
        assert!(matches!(err, DeviceError::MemoryAllocation { requested: 72, .. }));
        assert_eq!(pool.live_allocations(), 0);
    }
}
