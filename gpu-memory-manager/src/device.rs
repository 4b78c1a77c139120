use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::buffer::{DeviceBuffer, DeviceScalar};
use crate::error::{DeviceError, DeviceResult};
use crate::memory_pool::DeviceMemoryPool;
use crate::stream::Stream;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device id
    pub ordinal: usize,
    /// Device memory budget (bytes)
    pub memory_limit: usize,
    /// Threads per block for 1-D launches
    pub threads_per_block: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ordinal: 0,
            memory_limit: 8 * 1024 * 1024 * 1024, // 8GB
            threads_per_block: 256,
        }
    }
}

/// SIMT device context.
///
/// Kernel grids execute on the rayon thread pool; device memory is host
/// memory accounted against the configured budget. Streams created from the
/// same device share its memory pool but nothing else.
#[derive(Debug)]
pub struct GpuDevice {
    config: DeviceConfig,
    pool: Arc<DeviceMemoryPool>,
    next_stream: AtomicU64,
}

impl GpuDevice {
    pub fn new(config: DeviceConfig) -> DeviceResult<Self> {
        if config.threads_per_block == 0 {
            return Err(DeviceError::InvalidValue(
                "threads_per_block must be non-zero".to_string(),
            ));
        }

        info!("Initializing device {}", config.ordinal);
        info!("  Memory limit: {} bytes", config.memory_limit);
        info!("  Threads per block: {}", config.threads_per_block);
        info!("  Worker threads: {}", rayon::current_num_threads());

        let pool = Arc::new(DeviceMemoryPool::new(config.memory_limit));
        Ok(Self {
            config,
            pool,
            next_stream: AtomicU64::new(1),
        })
    }

    /// Create an independent stream with its own sticky error slot.
    pub fn create_stream(&self) -> Stream {
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        Stream::new(id, Arc::clone(&self.pool), self.config.threads_per_block)
    }

    /// Upload `src` into a fresh buffer.
    pub fn htod_copy<T: DeviceScalar>(&self, src: &[T::Host]) -> DeviceResult<DeviceBuffer<T>> {
        self.create_stream().copy_htod(src)
    }

    /// Download a whole buffer.
    pub fn dtoh_copy<T: DeviceScalar>(&self, src: &DeviceBuffer<T>) -> DeviceResult<Vec<T::Host>> {
        self.create_stream().copy_dtoh(src)
    }

    pub fn ordinal(&self) -> usize {
        self.config.ordinal
    }

    pub fn threads_per_block(&self) -> u32 {
        self.config.threads_per_block
    }

    pub fn memory_limit(&self) -> usize {
        self.pool.limit()
    }

    pub fn memory_in_use(&self) -> usize {
        self.pool.in_use()
    }

    pub fn live_allocations(&self) -> usize {
        self.pool.live_allocations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_block_size_is_rejected() {
        let config = DeviceConfig {
            threads_per_block: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            GpuDevice::new(config),
            Err(DeviceError::InvalidValue(_))
        ));
    }

    #[test]
    fn streams_have_distinct_ids_and_errors() {
        let device = GpuDevice::new(DeviceConfig::default()).unwrap();
        let a = device.create_stream();
        let b = device.create_stream();
        assert_ne!(a.id(), b.id());

        a.launch("fail", 1, |_| Err(crate::KernelFault::Aborted("x")));
        assert!(a.peek_at_last_error().is_err());
        assert!(b.peek_at_last_error().is_ok());
    }

    #[test]
    fn buffers_are_accounted_on_the_device() {
        let device = GpuDevice::new(DeviceConfig::default()).unwrap();
        let buf = device.htod_copy::<f64>(&[1.0, 2.0]).unwrap();
        assert_eq!(device.memory_in_use(), 16);
        assert_eq!(device.live_allocations(), 1);
        assert_eq!(device.dtoh_copy(&buf).unwrap(), vec![1.0, 2.0]);
        drop(buf);
        assert_eq!(device.memory_in_use(), 0);
    }
}
