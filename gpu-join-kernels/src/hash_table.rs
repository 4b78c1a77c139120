//! Multi-valued open-addressing hash table for the build side of a join.
//!
//! Layout (all device buffers, sized once per build):
//!
//! ```text
//! slots[capacity]  u64  (hash >> 32) << 32 | (owner_row + 1), 0 = empty
//! heads[capacity]  i32  first build row of the slot's duplicate chain
//! next[build_rows] i32  next build row with the same key, -1 ends the chain
//! ```
//!
//! Each distinct key owns exactly one slot, claimed with a CAS by the first
//! thread that reaches it. Every build row with that key (the owner
//! included) is pushed onto the slot's chain with an atomic swap, so a
//! single probe of the slot reaches all duplicates. Collisions between
//! different keys are resolved by linear probing.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use tracing::debug;

use gpu_memory_manager::{DeviceBuffer, DeviceError, DeviceResult, KernelFault, Stream};

use crate::hash_kernel::JoinKey;

pub const EMPTY_SLOT: u64 = 0;
pub const END_OF_CHAIN: i32 = -1;

/// Largest build side whose row indices fit a slot and a match pair.
pub const MAX_BUILD_ROWS: usize = i32::MAX as usize;

const TAG_MASK: u64 = 0xFFFF_FFFF_0000_0000;
const ROW_MASK: u64 = 0x0000_0000_FFFF_FFFF;

/// Power-of-two capacity for `build_rows` keys at `load_factor`.
///
/// Always strictly larger than `build_rows`, so every probe sequence meets
/// an empty slot. A capacity that does not fit in `usize` is an
/// `InvalidValue` error.
pub fn table_capacity(build_rows: usize, load_factor: f64) -> DeviceResult<usize> {
    if !(load_factor > 0.0 && load_factor <= 1.0) {
        return Err(DeviceError::InvalidValue(format!(
            "load factor {} is outside (0, 1]",
            load_factor
        )));
    }
    let too_large = || {
        DeviceError::InvalidValue(format!(
            "hash table for {} rows at load factor {} is not addressable",
            build_rows, load_factor
        ))
    };

    let wanted = (build_rows as f64 / load_factor).ceil();
    if !wanted.is_finite() || wanted >= usize::MAX as f64 {
        return Err(too_large());
    }
    let mut capacity = (wanted as usize)
        .max(2)
        .checked_next_power_of_two()
        .ok_or_else(too_large)?;
    while capacity <= build_rows {
        capacity = capacity.checked_mul(2).ok_or_else(too_large)?;
    }
    Ok(capacity)
}

#[inline]
fn pack(hash: u64, row: usize) -> u64 {
    (hash & TAG_MASK) | (row as u64 + 1)
}

#[inline]
fn owner_row(slot: u64) -> usize {
    ((slot & ROW_MASK) - 1) as usize
}

#[inline]
fn same_tag(slot: u64, hash: u64) -> bool {
    slot & TAG_MASK == hash & TAG_MASK
}

pub struct JoinHashTable<'k, K: JoinKey> {
    build: &'k K,
    mask: usize,
    slots: DeviceBuffer<AtomicU64>,
    heads: DeviceBuffer<AtomicI32>,
    next: DeviceBuffer<AtomicI32>,
}

impl<'k, K: JoinKey> JoinHashTable<'k, K> {
    /// Allocate the table and launch the insert kernel, one thread per row
    /// of `build`.
    ///
    /// Insert faults are left on `stream`; callers check it before probing.
    pub fn build(stream: &Stream, build: &'k K, load_factor: f64) -> DeviceResult<Self> {
        let rows = build.num_rows();
        if rows > MAX_BUILD_ROWS {
            return Err(DeviceError::InvalidValue(format!(
                "build side has {} rows, at most {} are supported",
                rows, MAX_BUILD_ROWS
            )));
        }

        let capacity = table_capacity(rows, load_factor)?;
        debug!(
            "Building hash table: {} rows, capacity {} (load factor {:.2})",
            rows, capacity, load_factor
        );

        let table = Self {
            build,
            mask: capacity - 1,
            slots: stream.alloc_zeroed(capacity)?,
            heads: stream.alloc_filled(capacity, END_OF_CHAIN)?,
            next: stream.alloc_filled(rows, END_OF_CHAIN)?,
        };
        stream.launch("build_hash_table", rows, |row| table.insert(row));
        Ok(table)
    }

    fn insert(&self, row: usize) -> Result<(), KernelFault> {
        let hash = self.build.hash_row(row);
        let claim = pack(hash, row);
        let mut pos = hash as usize & self.mask;

        for _ in 0..self.capacity() {
            let slot = self.slot(pos)?;
            let mut current = slot.load(Ordering::Acquire);
            if current == EMPTY_SLOT {
                match slot.compare_exchange(EMPTY_SLOT, claim, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => return self.push_chain(pos, row),
                    Err(actual) => current = actual,
                }
            }
            if same_tag(current, hash) && self.build.rows_equal(owner_row(current), self.build, row) {
                return self.push_chain(pos, row);
            }
            pos = (pos + 1) & self.mask;
        }
        Err(KernelFault::Aborted("hash table full"))
    }

    fn push_chain(&self, pos: usize, row: usize) -> Result<(), KernelFault> {
        let head = self.heads.get(pos).ok_or(KernelFault::OutOfBounds { index: pos })?;
        let link = self.next.get(row).ok_or(KernelFault::OutOfBounds { index: row })?;
        let previous = head.swap(row as i32, Ordering::AcqRel);
        link.store(previous, Ordering::Release);
        Ok(())
    }

    #[inline]
    fn slot(&self, pos: usize) -> Result<&AtomicU64, KernelFault> {
        self.slots.get(pos).ok_or(KernelFault::OutOfBounds { index: pos })
    }

    /// Head of the chain holding `probe`'s key at `row`, or [`END_OF_CHAIN`].
    fn locate(&self, probe: &K, row: usize) -> i32 {
        let hash = probe.hash_row(row);
        let mut pos = hash as usize & self.mask;
        for _ in 0..self.capacity() {
            let current = match self.slots.get(pos) {
                Some(slot) => slot.load(Ordering::Acquire),
                None => return END_OF_CHAIN,
            };
            if current == EMPTY_SLOT {
                return END_OF_CHAIN;
            }
            if same_tag(current, hash) && self.build.rows_equal(owner_row(current), probe, row) {
                return self
                    .heads
                    .get(pos)
                    .map_or(END_OF_CHAIN, |head| head.load(Ordering::Acquire));
            }
            pos = (pos + 1) & self.mask;
        }
        END_OF_CHAIN
    }

    /// Every build row whose key equals `probe`'s key at `row`.
    ///
    /// The iterator walks the duplicate chain lazily; cloning it restarts
    /// the walk from the same position.
    pub fn find_all(&self, probe: &K, row: usize) -> Matches<'_> {
        Matches {
            next: self.next.as_slice(),
            cursor: self.locate(probe, row),
        }
    }

    pub fn contains(&self, probe: &K, row: usize) -> bool {
        self.locate(probe, row) != END_OF_CHAIN
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn build_rows(&self) -> usize {
        self.next.len()
    }

    /// Device bytes held by the table.
    pub fn byte_len(&self) -> usize {
        self.slots.byte_len() + self.heads.byte_len() + self.next.byte_len()
    }
}

/// Build rows matching one probe row.
#[derive(Debug, Clone)]
pub struct Matches<'t> {
    next: &'t [AtomicI32],
    cursor: i32,
}

impl Iterator for Matches<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor < 0 {
            return None;
        }
        let row = self.cursor as usize;
        self.cursor = self
            .next
            .get(row)
            .map_or(END_OF_CHAIN, |link| link.load(Ordering::Acquire));
        Some(row)
    }
}
