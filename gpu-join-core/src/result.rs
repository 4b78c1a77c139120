//! Join output container.

use std::sync::atomic::AtomicI32;

use gpu_memory_manager::{DeviceBuffer, DevicePtr, Stream};
use tracing::debug;

use crate::status::Result;

/// Device buffer of match pairs, owned by the caller.
///
/// The buffer holds two runs of `total_pairs` indices: every left index,
/// then every right index. Pair `i` is `(data[i], data[total_pairs + i])`;
/// `-1` marks the side without a matching row. Dropping the result frees
/// the buffer; [`JoinResult::release`] does the same explicitly.
#[derive(Debug)]
pub struct JoinResult {
    buffer: DeviceBuffer<AtomicI32>,
    total_pairs: usize,
    stream: Stream,
}

impl JoinResult {
    pub(crate) fn new(buffer: DeviceBuffer<AtomicI32>, stream: Stream) -> Self {
        let total_pairs = buffer.len() / 2;
        Self {
            buffer,
            total_pairs,
            stream,
        }
    }

    /// Element count of the flat buffer, always `2 * total_pairs()`.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn data(&self) -> DevicePtr {
        self.buffer.device_ptr()
    }

    pub fn total_pairs(&self) -> usize {
        self.total_pairs
    }

    pub fn is_empty(&self) -> bool {
        self.total_pairs == 0
    }

    /// Copy the flat buffer to the host.
    pub fn to_host(&self) -> Result<Vec<i32>> {
        Ok(self.stream.copy_dtoh(&self.buffer)?)
    }

    /// Copy the buffer to the host as `(left_index, right_index)` pairs.
    pub fn pairs(&self) -> Result<Vec<(i32, i32)>> {
        let flat = self.to_host()?;
        let (left, right) = flat.split_at(self.total_pairs);
        Ok(left.iter().copied().zip(right.iter().copied()).collect())
    }

    /// Free the device buffer.
    pub fn release(self) {
        debug!(
            "Releasing join result: {} pairs at {}",
            self.total_pairs,
            self.buffer.device_ptr()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_memory_manager::{DeviceConfig, GpuDevice};

    #[test]
    fn splits_flat_runs_into_pairs() {
        let dev = GpuDevice::new(DeviceConfig::default()).unwrap();
        let stream = dev.create_stream();
        let buf = stream
            .copy_htod::<AtomicI32>(&[0, 1, -1, 4, -1, 2])
            .unwrap();
        let result = JoinResult::new(buf, stream);

        assert_eq!(result.size(), 6);
        assert_eq!(result.total_pairs(), 3);
        assert!(!result.is_empty());
        assert_eq!(result.pairs().unwrap(), vec![(0, 4), (1, -1), (-1, 2)]);
    }

    #[test]
    fn release_frees_device_memory() {
        let dev = GpuDevice::new(DeviceConfig::default()).unwrap();
        let stream = dev.create_stream();
        let buf = stream.copy_htod::<AtomicI32>(&[7, 9]).unwrap();
        let result = JoinResult::new(buf, stream);
        assert_eq!(dev.memory_in_use(), 8);

        result.release();
        assert_eq!(dev.memory_in_use(), 0);
        assert_eq!(dev.live_allocations(), 0);
    }
}
