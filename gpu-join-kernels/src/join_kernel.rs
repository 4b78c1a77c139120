//! Probe-side kernels.
//!
//! Output is produced in two passes so that every thread knows where to
//! write without contention: a count kernel sizes each probe row's output,
//! an exclusive scan turns counts into offsets, and a scatter kernel writes
//! the pairs. The output buffer holds all left indices followed by all
//! right indices:
//!
//! ```text
//! out[0 .. total)         left_index of pair i
//! out[total .. 2 * total) right_index of pair i
//! ```

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use tracing::debug;

use gpu_memory_manager::{DeviceBuffer, DeviceResult, KernelFault, Stream};

use crate::hash_kernel::JoinKey;
use crate::hash_table::JoinHashTable;

/// Index written for "no matching row on this side".
pub const NO_MATCH: i32 = -1;

/// Flat pair buffer being filled by scatter kernels.
pub struct PairSink<'o> {
    out: &'o DeviceBuffer<AtomicI32>,
    total_pairs: usize,
}

impl<'o> PairSink<'o> {
    pub fn new(out: &'o DeviceBuffer<AtomicI32>) -> Self {
        Self {
            out,
            total_pairs: out.len() / 2,
        }
    }

    #[inline]
    fn write(&self, pair: usize, left: i32, right: i32) -> Result<(), KernelFault> {
        if pair >= self.total_pairs {
            return Err(KernelFault::OutOfBounds { index: pair });
        }
        let l = self.out.get(pair).ok_or(KernelFault::OutOfBounds { index: pair })?;
        let r_index = self.total_pairs + pair;
        let r = self
            .out
            .get(r_index)
            .ok_or(KernelFault::OutOfBounds { index: r_index })?;
        l.store(left, Ordering::Relaxed);
        r.store(right, Ordering::Relaxed);
        Ok(())
    }
}

#[inline]
fn load(buf: &DeviceBuffer<AtomicU64>, index: usize) -> Result<u64, KernelFault> {
    buf.get(index)
        .map(|v| v.load(Ordering::Relaxed))
        .ok_or(KernelFault::OutOfBounds { index })
}

#[inline]
fn store(buf: &DeviceBuffer<AtomicU64>, index: usize, value: u64) -> Result<(), KernelFault> {
    buf.get(index)
        .ok_or(KernelFault::OutOfBounds { index })?
        .store(value, Ordering::Relaxed);
    Ok(())
}

pub struct JoinKernel<'s> {
    stream: &'s Stream,
}

impl<'s> JoinKernel<'s> {
    pub fn new(stream: &'s Stream) -> Self {
        Self { stream }
    }

    /// Number of output pairs per probe row.
    ///
    /// With `emit_unmatched`, a probe row without matches still counts one
    /// pair (its sentinel pair).
    pub fn count_matches<K: JoinKey>(
        &self,
        table: &JoinHashTable<'_, K>,
        probe: &K,
        emit_unmatched: bool,
    ) -> DeviceResult<DeviceBuffer<AtomicU64>> {
        let rows = probe.num_rows();
        debug!("count_matches: {} probe rows (emit_unmatched={})", rows, emit_unmatched);
        let counts = self.stream.alloc_zeroed::<AtomicU64>(rows)?;
        self.stream.launch("count_matches", rows, |row| {
            let found = table.find_all(probe, row).count() as u64;
            let n = if found == 0 && emit_unmatched { 1 } else { found };
            store(&counts, row, n)
        });
        Ok(counts)
    }

    /// 1 for every probe row that has no match in `table`, 0 otherwise.
    pub fn flag_unmatched<K: JoinKey>(
        &self,
        table: &JoinHashTable<'_, K>,
        probe: &K,
    ) -> DeviceResult<DeviceBuffer<AtomicU64>> {
        let rows = probe.num_rows();
        debug!("flag_unmatched: {} probe rows", rows);
        let flags = self.stream.alloc_zeroed::<AtomicU64>(rows)?;
        self.stream.launch("flag_unmatched", rows, |row| {
            store(&flags, row, u64::from(!table.contains(probe, row)))
        });
        Ok(flags)
    }

    /// Write `(probe_row, build_row)` pairs at the scanned `offsets`.
    ///
    /// Probe rows are the left side of the pair. With `emit_unmatched`, a
    /// probe row without matches writes `(probe_row, -1)`.
    pub fn scatter_matches<K: JoinKey>(
        &self,
        table: &JoinHashTable<'_, K>,
        probe: &K,
        offsets: &DeviceBuffer<AtomicU64>,
        emit_unmatched: bool,
        sink: &PairSink<'_>,
    ) {
        debug!("scatter_matches: {} probe rows", probe.num_rows());
        self.stream.launch("scatter_matches", probe.num_rows(), |row| {
            let base = load(offsets, row)? as usize;
            let mut written = 0usize;
            for build_row in table.find_all(probe, row) {
                sink.write(base + written, row as i32, build_row as i32)?;
                written += 1;
            }
            if written == 0 && emit_unmatched {
                sink.write(base, row as i32, NO_MATCH)?;
            }
            Ok(())
        });
    }

    /// Write `(-1, row)` for every flagged row, starting at pair `first_pair`.
    ///
    /// `offsets` is the exclusive scan of the flags and `flagged` its total.
    pub fn scatter_unmatched(
        &self,
        offsets: &DeviceBuffer<AtomicU64>,
        flagged: u64,
        first_pair: usize,
        sink: &PairSink<'_>,
    ) {
        let rows = offsets.len();
        debug!("scatter_unmatched: {} rows, {} flagged", rows, flagged);
        self.stream.launch("scatter_unmatched", rows, |row| {
            let start = load(offsets, row)?;
            let end = if row + 1 < rows {
                load(offsets, row + 1)?
            } else {
                flagged
            };
            if end > start {
                sink.write(first_pair + start as usize, NO_MATCH, row as i32)?;
            }
            Ok(())
        });
    }
}
