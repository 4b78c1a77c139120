//! Join driver: key validation, dtype dispatch and the build/probe pipeline.
//!
//! The right key is always the build side. Each stage is one kernel launch
//! on the call's own stream, and the stream's error slot is checked after
//! every launch so a fault is attributed to the kernel that raised it.

use std::sync::atomic::{AtomicI32, AtomicU64};

use gpu_join_kernels::{
    exclusive_scan, CompositeKey, JoinHashTable, JoinKernel, JoinKey, PairSink, SingleKey,
    MAX_BUILD_ROWS, NO_MATCH,
};
pub use gpu_join_kernels::MAX_KEY_COLUMNS;
use gpu_memory_manager::{DeviceBuffer, DeviceError, Stream};
use tracing::{debug, warn};

use crate::column::{Column, ColumnData};
use crate::join_kind::JoinKind;
use crate::status::{JoinError, Result};

/// Per-call knobs taken from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JoinOptions {
    pub load_factor: f64,
    pub allow_multi_column_inner: bool,
}

/// Check that `left` and `right` form a joinable key pair.
pub fn validate_keys(
    kind: JoinKind,
    left: &[Column<'_>],
    right: &[Column<'_>],
    allow_multi_column_inner: bool,
) -> Result<()> {
    if left.len() != right.len() {
        return Err(JoinError::ColumnMismatch(format!(
            "left key has {} columns, right key has {}",
            left.len(),
            right.len()
        )));
    }
    if left.is_empty() || left.len() > MAX_KEY_COLUMNS {
        return Err(JoinError::UnsupportedJoinCombination(format!(
            "join keys need 1 to {} columns, got {}",
            MAX_KEY_COLUMNS,
            left.len()
        )));
    }
    if left.len() > 1 && kind == JoinKind::Inner && !allow_multi_column_inner {
        return Err(JoinError::UnsupportedJoinCombination(format!(
            "INNER join on a {}-column key",
            left.len()
        )));
    }

    for (side, cols) in [("left", left), ("right", right)] {
        let rows = cols[0].size();
        if let Some((i, col)) = cols.iter().enumerate().find(|(_, c)| c.size() != rows) {
            return Err(JoinError::ColumnMismatch(format!(
                "{} key column {} has {} rows, column 0 has {}",
                side,
                i,
                col.size(),
                rows
            )));
        }
        if rows > MAX_BUILD_ROWS {
            return Err(DeviceError::InvalidValue(format!(
                "{} side has {} rows, at most {} are addressable",
                side, rows, MAX_BUILD_ROWS
            ))
            .into());
        }
    }

    for (i, (l, r)) in left.iter().zip(right).enumerate() {
        if l.storage() != r.storage() {
            return Err(JoinError::ColumnMismatch(format!(
                "key column {}: {} on the left, {} on the right",
                i,
                l.dtype(),
                r.dtype()
            )));
        }
    }
    Ok(())
}

/// Validate, dispatch on key storage and run the join on `stream`.
///
/// Returns the flat pair buffer; every intermediate buffer is freed before
/// returning, on success and on failure.
pub(crate) fn execute(
    stream: &Stream,
    kind: JoinKind,
    left: &[Column<'_>],
    right: &[Column<'_>],
    opts: JoinOptions,
) -> Result<DeviceBuffer<AtomicI32>> {
    validate_keys(kind, left, right, opts.allow_multi_column_inner)?;

    if left.len() == 1 {
        return dispatch_single(stream, kind, left[0].data(), right[0].data(), opts.load_factor);
    }

    let left_key = CompositeKey::new(left.iter().map(Column::view).collect())?;
    let right_key = CompositeKey::new(right.iter().map(Column::view).collect())?;
    debug!("Composite key of {} columns", left_key.arity());
    hash_join(stream, kind, &left_key, &right_key, opts.load_factor)
}

fn dispatch_single(
    stream: &Stream,
    kind: JoinKind,
    left: ColumnData<'_>,
    right: ColumnData<'_>,
    load_factor: f64,
) -> Result<DeviceBuffer<AtomicI32>> {
    macro_rules! single {
        ($($variant:ident),*) => {
            match (left, right) {
                $(
                    (ColumnData::$variant(l), ColumnData::$variant(r)) => hash_join(
                        stream,
                        kind,
                        &SingleKey::new(l.as_slice()),
                        &SingleKey::new(r.as_slice()),
                        load_factor,
                    ),
                )*
                (l, r) => Err(JoinError::ColumnMismatch(format!(
                    "key storage {:?} vs {:?}",
                    l.storage(),
                    r.storage()
                ))),
            }
        };
    }
    single!(I8, I16, I32, I64, F32, F64)
}

/// Surface the stream's pending fault, attributed to `stage`.
fn check(stream: &Stream, stage: &str) -> Result<()> {
    stream.get_last_error().map_err(|err| {
        warn!(
            "Join stage {} failed on stream {}: {} ({})",
            stage,
            stream.id(),
            err,
            err.name()
        );
        JoinError::Device(err)
    })
}

/// Build on `right`, probe with `left`; OUTER adds the reverse pass.
fn hash_join<K: JoinKey>(
    stream: &Stream,
    kind: JoinKind,
    left: &K,
    right: &K,
    load_factor: f64,
) -> Result<DeviceBuffer<AtomicI32>> {
    let kernel = JoinKernel::new(stream);
    let emit_left = kind.emits_unmatched_left();

    let right_table = JoinHashTable::build(stream, right, load_factor)?;
    check(stream, "build_hash_table")?;

    let offsets = kernel.count_matches(&right_table, left, emit_left)?;
    check(stream, "count_matches")?;
    let left_pairs = exclusive_scan(stream, &offsets)?;
    check(stream, "exclusive_scan")?;

    let unmatched_right = if kind.emits_unmatched_right() {
        Some(flag_unmatched_right(stream, &kernel, left, right, load_factor)?)
    } else {
        None
    };
    let right_only = unmatched_right.as_ref().map_or(0, |(_, n)| *n);

    let total = pair_count(left_pairs, right_only)?;
    debug!(
        "Join sizing: {} probe pairs, {} unmatched build rows",
        left_pairs, right_only
    );

    let out = stream.alloc_filled::<AtomicI32>(2 * total, NO_MATCH)?;
    let sink = PairSink::new(&out);

    kernel.scatter_matches(&right_table, left, &offsets, emit_left, &sink);
    check(stream, "scatter_matches")?;

    if let Some((flags, flagged)) = &unmatched_right {
        kernel.scatter_unmatched(flags, *flagged, left_pairs as usize, &sink);
        check(stream, "scatter_unmatched")?;
    }

    stream.synchronize()?;
    Ok(out)
}

/// Scanned "no left match" flags for the right rows, plus their count.
///
/// Uses a second table built on the left key; it is freed before returning.
fn flag_unmatched_right<K: JoinKey>(
    stream: &Stream,
    kernel: &JoinKernel<'_>,
    left: &K,
    right: &K,
    load_factor: f64,
) -> Result<(DeviceBuffer<AtomicU64>, u64)> {
    let flags = {
        let left_table = JoinHashTable::build(stream, left, load_factor)?;
        check(stream, "build_hash_table")?;
        let flags = kernel.flag_unmatched(&left_table, right)?;
        check(stream, "flag_unmatched")?;
        flags
    };
    let flagged = exclusive_scan(stream, &flags)?;
    check(stream, "exclusive_scan")?;
    Ok((flags, flagged))
}

fn pair_count(left_pairs: u64, right_only: u64) -> Result<usize> {
    left_pairs
        .checked_add(right_only)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| n.checked_mul(2).is_some())
        .ok_or_else(|| {
            DeviceError::InvalidValue(format!(
                "join output of {} + {} pairs is not addressable",
                left_pairs, right_only
            ))
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JoinStatus;
    use gpu_join_kernels::hash_scalar;
    use gpu_memory_manager::{DeviceConfig, GpuDevice, KernelFault};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device() -> GpuDevice {
        GpuDevice::new(DeviceConfig {
            threads_per_block: 4,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    const OPTS: JoinOptions = JoinOptions {
        load_factor: 0.5,
        allow_multi_column_inner: false,
    };

    fn sorted_pairs(flat: Vec<i32>) -> Vec<(i32, i32)> {
        let (l, r) = flat.split_at(flat.len() / 2);
        let mut pairs: Vec<_> = l.iter().copied().zip(r.iter().copied()).collect();
        pairs.sort_unstable();
        pairs
    }

    #[test]
    fn outer_appends_unmatched_right_rows() {
        let dev = device();
        let stream = dev.create_stream();
        let l = dev.htod_copy::<i64>(&[1, 2, 2]).unwrap();
        let r = dev.htod_copy::<i64>(&[2, 3]).unwrap();
        let out = execute(
            &stream,
            JoinKind::Outer,
            &[Column::from(&l)],
            &[Column::from(&r)],
            OPTS,
        )
        .unwrap();
        assert_eq!(
            sorted_pairs(stream.copy_dtoh(&out).unwrap()),
            vec![(-1, 1), (0, -1), (1, 0), (2, 0)]
        );
    }

    #[test]
    fn float_keys_compare_bitwise() {
        let dev = device();
        let stream = dev.create_stream();
        let l = dev.htod_copy::<f32>(&[0.0, f32::NAN, 1.5]).unwrap();
        let r = dev.htod_copy::<f32>(&[-0.0, f32::NAN, 1.5]).unwrap();
        let out = execute(
            &stream,
            JoinKind::Inner,
            &[Column::from(&l)],
            &[Column::from(&r)],
            OPTS,
        )
        .unwrap();
        assert_eq!(sorted_pairs(stream.copy_dtoh(&out).unwrap()), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn intermediates_are_freed() {
        let dev = device();
        let l = dev.htod_copy::<i32>(&[1, 2, 3, 4]).unwrap();
        let r = dev.htod_copy::<i32>(&[4, 4, 5]).unwrap();
        let inputs = dev.memory_in_use();

        let stream = dev.create_stream();
        let out = execute(
            &stream,
            JoinKind::Outer,
            &[Column::from(&l)],
            &[Column::from(&r)],
            OPTS,
        )
        .unwrap();
        assert_eq!(dev.memory_in_use(), inputs + out.byte_len());
        assert_eq!(dev.live_allocations(), 3);
    }

    #[test]
    fn ragged_side_is_a_column_mismatch() {
        let dev = device();
        let a = dev.htod_copy::<i32>(&[1, 2]).unwrap();
        let b = dev.htod_copy::<i32>(&[1]).unwrap();
        let err = validate_keys(
            JoinKind::Left,
            &[Column::from(&a), Column::from(&b)],
            &[Column::from(&a), Column::from(&a)],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::ColumnMismatch(_)));
    }

    #[test]
    fn storage_must_agree_per_column() {
        let dev = device();
        let a = dev.htod_copy::<i32>(&[1]).unwrap();
        let b = dev.htod_copy::<i64>(&[1]).unwrap();
        let err = validate_keys(
            JoinKind::Left,
            &[Column::from(&a)],
            &[Column::from(&b)],
            false,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::ColumnMismatch(_)));
    }

    #[test]
    fn pair_count_overflow_is_a_device_error() {
        assert_eq!(pair_count(3, 4).unwrap(), 7);
        assert!(matches!(
            pair_count(u64::MAX, 1),
            Err(JoinError::Device(DeviceError::InvalidValue(_)))
        ));
    }

    #[test]
    fn check_surfaces_and_clears_the_fault() {
        let dev = device();
        let stream = dev.create_stream();
        stream.launch("count_matches", 1, |_| Err(KernelFault::Aborted("bad offset")));

        let err = check(&stream, "count_matches").unwrap_err();
        assert_eq!(err.status(), JoinStatus::DeviceError);
        assert!(matches!(
            err,
            JoinError::Device(DeviceError::LaunchFailure {
                kernel: "count_matches",
                ..
            })
        ));
        assert!(stream.peek_at_last_error().is_ok());
        assert!(check(&stream, "count_matches").is_ok());
    }

    /// Key whose cross-side comparisons start matching after `flip_after`
    /// calls, so the count and scatter passes disagree.
    struct DriftingKey {
        values: Vec<i32>,
        calls: AtomicUsize,
        flip_after: usize,
    }

    impl DriftingKey {
        fn new(values: Vec<i32>, flip_after: usize) -> Self {
            Self {
                values,
                calls: AtomicUsize::new(0),
                flip_after,
            }
        }
    }

    impl JoinKey for DriftingKey {
        fn num_rows(&self) -> usize {
            self.values.len()
        }

        fn hash_row(&self, row: usize) -> u64 {
            hash_scalar(self.values[row])
        }

        fn rows_equal(&self, row: usize, other: &Self, other_row: usize) -> bool {
            let equal = self.values[row] == other.values[other_row];
            if std::ptr::eq(self, other) {
                return equal;
            }
            self.calls.fetch_add(1, Ordering::Relaxed) >= self.flip_after && equal
        }
    }

    #[test]
    fn scatter_fault_fails_the_join_and_frees_intermediates() {
        let dev = device();
        let stream = dev.create_stream();
        let left = DriftingKey::new(vec![1, 2, 3], 0);
        let right = DriftingKey::new(vec![1, 2, 3], 3);
        let inputs = dev.memory_in_use();

        // The count pass sees no matches, then scatter writes past the
        // empty output.
        let err = hash_join(&stream, JoinKind::Inner, &left, &right, 0.5).unwrap_err();
        assert!(matches!(
            err,
            JoinError::Device(DeviceError::IllegalAddress {
                kernel: "scatter_matches",
                index: 0
            })
        ));
        assert_eq!(err.status(), JoinStatus::DeviceError);
        assert_eq!(dev.memory_in_use(), inputs);
        assert_eq!(dev.live_allocations(), 0);
        assert!(stream.peek_at_last_error().is_ok());
    }

    #[test]
    fn unaddressable_table_is_a_device_error() {
        let dev = device();
        let stream = dev.create_stream();
        let l = dev.htod_copy::<i32>(&[1, 2]).unwrap();
        let r = dev.htod_copy::<i32>(&[2, 3]).unwrap();
        let inputs = dev.memory_in_use();
        let opts = JoinOptions {
            load_factor: 1e-300,
            ..OPTS
        };

        let err = execute(
            &stream,
            JoinKind::Left,
            &[Column::from(&l)],
            &[Column::from(&r)],
            opts,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::Device(DeviceError::InvalidValue(_))));
        assert_eq!(dev.memory_in_use(), inputs);
    }
}
