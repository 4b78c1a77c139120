//! In-place exclusive prefix sum over a device buffer.
//!
//! Three launches, one block of `threads_per_block` elements per thread in
//! the outer passes:
//! 1. `scan_block_sums`: each thread reduces its block.
//! 2. `scan_block_offsets`: a single thread scans the block sums.
//! 3. `scan_apply`: each thread rewrites its block as an exclusive scan
//!    seeded with the block's offset.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use gpu_memory_manager::{DeviceBuffer, DeviceResult, KernelFault, Stream};

/// Replace `values` with its exclusive prefix sum and return the total.
///
/// Reading the total back to the host synchronizes the stream.
pub fn exclusive_scan(stream: &Stream, values: &DeviceBuffer<AtomicU64>) -> DeviceResult<u64> {
    let n = values.len();
    if n == 0 {
        return Ok(0);
    }

    let block = stream.threads_per_block() as usize;
    let blocks = n.div_ceil(block);
    debug!("exclusive_scan: {} elements in {} blocks", n, blocks);

    // One extra slot receives the grand total.
    let sums = stream.alloc_zeroed::<AtomicU64>(blocks + 1)?;
    let data = values.as_slice();
    let block_sums = sums.as_slice();

    stream.launch("scan_block_sums", blocks, |b| {
        let start = b * block;
        let end = (start + block).min(n);
        let chunk = data.get(start..end).ok_or(KernelFault::OutOfBounds { index: end })?;
        let sum: u64 = chunk.iter().map(|v| v.load(Ordering::Relaxed)).sum();
        block_sums
            .get(b)
            .ok_or(KernelFault::OutOfBounds { index: b })?
            .store(sum, Ordering::Relaxed);
        Ok(())
    });

    stream.launch("scan_block_offsets", 1, |_| {
        let mut running = 0u64;
        for slot in block_sums {
            let sum = slot.load(Ordering::Relaxed);
            slot.store(running, Ordering::Relaxed);
            running += sum;
        }
        Ok(())
    });

    stream.launch("scan_apply", blocks, |b| {
        let start = b * block;
        let end = (start + block).min(n);
        let chunk = data.get(start..end).ok_or(KernelFault::OutOfBounds { index: end })?;
        let mut running = block_sums
            .get(b)
            .ok_or(KernelFault::OutOfBounds { index: b })?
            .load(Ordering::Relaxed);
        for v in chunk {
            let value = v.load(Ordering::Relaxed);
            v.store(running, Ordering::Relaxed);
            running += value;
        }
        Ok(())
    });

    stream.read_element(&sums, blocks)
}
