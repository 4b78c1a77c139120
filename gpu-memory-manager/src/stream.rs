//! Execution streams.
//!
//! Work issued on one stream executes in issue order: a launch returns only
//! once every thread of its grid has finished, so a kernel always observes
//! the writes of the kernels issued before it. Faults raised by kernel
//! threads are sticky and surface through [`Stream::peek_at_last_error`].

use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::buffer::{DeviceBuffer, DeviceScalar};
use crate::error::{DeviceError, DeviceResult};
use crate::memory_pool::DeviceMemoryPool;

/// Fault raised by a single kernel thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelFault {
    /// The thread indexed past the end of a buffer.
    OutOfBounds { index: usize },
    /// The thread could not complete its work.
    Aborted(&'static str),
}

impl KernelFault {
    fn into_device_error(self, kernel: &'static str, thread: usize) -> DeviceError {
        match self {
            KernelFault::OutOfBounds { index } => DeviceError::IllegalAddress { kernel, index },
            KernelFault::Aborted(reason) => DeviceError::LaunchFailure {
                kernel,
                reason: format!("thread {}: {}", thread, reason),
            },
        }
    }
}

/// Grid geometry of a 1-D launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: u32,
    pub block_dim: u32,
}

impl LaunchConfig {
    /// Smallest grid of `block_dim`-wide blocks covering `n` threads.
    ///
    /// Saturates at `u32::MAX` blocks.
    pub fn for_num_elems(n: usize, block_dim: u32) -> Self {
        let block_dim = block_dim.max(1);
        Self {
            grid_dim: u32::try_from(n.div_ceil(block_dim as usize)).unwrap_or(u32::MAX),
            block_dim,
        }
    }
}

#[derive(Debug)]
pub struct Stream {
    id: u64,
    pool: Arc<DeviceMemoryPool>,
    threads_per_block: u32,
    last_error: Mutex<Option<DeviceError>>,
}

impl Stream {
    pub(crate) fn new(id: u64, pool: Arc<DeviceMemoryPool>, threads_per_block: u32) -> Self {
        Self {
            id,
            pool,
            threads_per_block,
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn threads_per_block(&self) -> u32 {
        self.threads_per_block
    }

    pub(crate) fn pool(&self) -> &Arc<DeviceMemoryPool> {
        &self.pool
    }

    /// Launch `kernel` over `n` threads; `body` runs once per thread index.
    ///
    /// The first fault raised by any thread aborts the remaining threads of
    /// the grid and is recorded as the stream's last error.
    pub fn launch<F>(&self, kernel: &'static str, n: usize, body: F)
    where
        F: Fn(usize) -> Result<(), KernelFault> + Send + Sync,
    {
        let cfg = LaunchConfig::for_num_elems(n, self.threads_per_block);
        debug!(
            "Launching {} on stream {}: {} threads ({} x {})",
            kernel, self.id, n, cfg.grid_dim, cfg.block_dim
        );
        if n == 0 {
            return;
        }

        let outcome = (0..n)
            .into_par_iter()
            .with_min_len(cfg.block_dim as usize)
            .try_for_each(|tid| body(tid).map_err(|fault| (tid, fault)));

        if let Err((tid, fault)) = outcome {
            self.record(fault.into_device_error(kernel, tid));
        }
    }

    fn record(&self, err: DeviceError) {
        let mut slot = self.last_error.lock();
        if slot.is_none() {
            debug!("Stream {} recorded {}", self.id, err.name());
            *slot = Some(err);
        }
    }

    /// Return the sticky error, if any, without clearing it.
    pub fn peek_at_last_error(&self) -> DeviceResult<()> {
        match &*self.last_error.lock() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Return and clear the sticky error.
    pub fn get_last_error(&self) -> DeviceResult<()> {
        match self.last_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for all issued work; reports the sticky error if one is pending.
    pub fn synchronize(&self) -> DeviceResult<()> {
        self.peek_at_last_error()
    }

    pub fn alloc_zeroed<T: DeviceScalar>(&self, len: usize) -> DeviceResult<DeviceBuffer<T>> {
        DeviceBuffer::filled(&self.pool, len, T::Host::default())
    }

    pub fn alloc_filled<T: DeviceScalar>(
        &self,
        len: usize,
        value: T::Host,
    ) -> DeviceResult<DeviceBuffer<T>> {
        DeviceBuffer::filled(&self.pool, len, value)
    }
}
