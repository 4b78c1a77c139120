//! Join key hashing.
//!
//! A key row is hashed from its values alone: a single column hashes the
//! scalar with the MurmurHash3 64-bit finalizer, additional columns are
//! folded in with an order-sensitive combine. Build and probe use the same
//! functions, so equal key rows always land on the same hash.

use gpu_memory_manager::{DeviceError, DeviceResult};

/// Widest composite key, in columns.
pub const MAX_KEY_COLUMNS: usize = 3;

/// Storage type of a key column on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

/// Scalar usable as (part of) a join key.
///
/// `key_bits` is the canonical 64-bit image of the value: integers are
/// sign-extended, floats use their IEEE bit pattern. Two values are equal
/// as keys iff their images are equal.
pub trait ScalarKey: Copy + Send + Sync + 'static {
    const TYPE: ScalarType;

    fn key_bits(self) -> u64;
}

macro_rules! int_key {
    ($($t:ty => $tag:ident),* $(,)?) => {
        $(
            impl ScalarKey for $t {
                const TYPE: ScalarType = ScalarType::$tag;

                #[inline]
                fn key_bits(self) -> u64 {
                    self as i64 as u64
                }
            }
        )*
    };
}

int_key!(i8 => I8, i16 => I16, i32 => I32, i64 => I64);

impl ScalarKey for f32 {
    const TYPE: ScalarType = ScalarType::F32;

    #[inline]
    fn key_bits(self) -> u64 {
        self.to_bits() as u64
    }
}

impl ScalarKey for f64 {
    const TYPE: ScalarType = ScalarType::F64;

    #[inline]
    fn key_bits(self) -> u64 {
        self.to_bits()
    }
}

/// MurmurHash3 64-bit finalizer.
#[inline]
pub fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline]
pub fn hash_scalar<T: ScalarKey>(value: T) -> u64 {
    fmix64(value.key_bits())
}

/// Fold `hash` into `seed`. Not commutative: `combine(a, b) != combine(b, a)`.
#[inline]
pub fn hash_combine(seed: u64, hash: u64) -> u64 {
    seed ^ hash
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Row-addressable join key, shared by the build and probe kernels.
pub trait JoinKey: Sync {
    fn num_rows(&self) -> usize;

    fn hash_row(&self, row: usize) -> u64;

    /// Whether `row` of `self` and `other_row` of `other` hold equal keys.
    fn rows_equal(&self, row: usize, other: &Self, other_row: usize) -> bool;
}

/// Single-column key, monomorphic in the column's storage type.
#[derive(Debug, Clone, Copy)]
pub struct SingleKey<'a, T> {
    values: &'a [T],
}

impl<'a, T: ScalarKey> SingleKey<'a, T> {
    pub fn new(values: &'a [T]) -> Self {
        Self { values }
    }
}

impl<T: ScalarKey> JoinKey for SingleKey<'_, T> {
    fn num_rows(&self) -> usize {
        self.values.len()
    }

    #[inline]
    fn hash_row(&self, row: usize) -> u64 {
        hash_scalar(self.values[row])
    }

    #[inline]
    fn rows_equal(&self, row: usize, other: &Self, other_row: usize) -> bool {
        self.values[row].key_bits() == other.values[other_row].key_bits()
    }
}

/// Type-erased view of one key column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnView<'a> {
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl ColumnView<'_> {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ColumnView::I8(_) => ScalarType::I8,
            ColumnView::I16(_) => ScalarType::I16,
            ColumnView::I32(_) => ScalarType::I32,
            ColumnView::I64(_) => ScalarType::I64,
            ColumnView::F32(_) => ScalarType::F32,
            ColumnView::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnView::I8(v) => v.len(),
            ColumnView::I16(v) => v.len(),
            ColumnView::I32(v) => v.len(),
            ColumnView::I64(v) => v.len(),
            ColumnView::F32(v) => v.len(),
            ColumnView::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn key_bits(&self, row: usize) -> u64 {
        match self {
            ColumnView::I8(v) => v[row].key_bits(),
            ColumnView::I16(v) => v[row].key_bits(),
            ColumnView::I32(v) => v[row].key_bits(),
            ColumnView::I64(v) => v[row].key_bits(),
            ColumnView::F32(v) => v[row].key_bits(),
            ColumnView::F64(v) => v[row].key_bits(),
        }
    }

    #[inline]
    pub fn hash_at(&self, row: usize) -> u64 {
        fmix64(self.key_bits(row))
    }
}

/// Key spanning several columns of one table, compared column by column.
#[derive(Debug, Clone)]
pub struct CompositeKey<'a> {
    columns: Vec<ColumnView<'a>>,
    rows: usize,
}

impl<'a> CompositeKey<'a> {
    pub fn new(columns: Vec<ColumnView<'a>>) -> DeviceResult<Self> {
        let rows = match columns.first() {
            Some(first) => first.len(),
            None => {
                return Err(DeviceError::InvalidValue(
                    "composite key without columns".to_string(),
                ))
            }
        };
        if columns.len() > MAX_KEY_COLUMNS {
            return Err(DeviceError::InvalidValue(format!(
                "composite key of {} columns, at most {} supported",
                columns.len(),
                MAX_KEY_COLUMNS
            )));
        }
        if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
            return Err(DeviceError::InvalidValue(format!(
                "composite key columns disagree on length: {} vs {}",
                rows,
                bad.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }
}

impl JoinKey for CompositeKey<'_> {
    fn num_rows(&self) -> usize {
        self.rows
    }

    #[inline]
    fn hash_row(&self, row: usize) -> u64 {
        let mut columns = self.columns.iter();
        let seed = columns.next().map_or(0, |col| col.hash_at(row));
        columns.fold(seed, |seed, col| hash_combine(seed, col.hash_at(row)))
    }

    #[inline]
    fn rows_equal(&self, row: usize, other: &Self, other_row: usize) -> bool {
        self.columns.len() == other.columns.len()
            && self.columns.iter().zip(&other.columns).all(|(a, b)| {
                a.scalar_type() == b.scalar_type() && a.key_bits(row) == b.key_bits(other_row)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_hash_is_scalar_hash() {
        let values = [3i32, -7, 3];
        let single = SingleKey::new(&values);
        let composite = CompositeKey::new(vec![ColumnView::I32(&values)]).unwrap();
        for row in 0..values.len() {
            assert_eq!(single.hash_row(row), hash_scalar(values[row]));
            assert_eq!(composite.hash_row(row), single.hash_row(row));
        }
        assert_eq!(single.hash_row(0), single.hash_row(2));
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = [1i64, 2];
        let b = [2i64, 1];
        let key = CompositeKey::new(vec![ColumnView::I64(&a), ColumnView::I64(&b)]).unwrap();
        // Row 0 is (1, 2), row 1 is (2, 1).
        assert_ne!(key.hash_row(0), key.hash_row(1));
        assert!(!key.rows_equal(0, &key, 1));
    }

    #[test]
    fn hashing_is_independent_of_width() {
        // Same value in different storage widths hashes identically; equality
        // still requires matching storage types.
        assert_eq!(hash_scalar(5i8), hash_scalar(5i64));
        assert_eq!(hash_scalar(-1i16), hash_scalar(-1i32));
    }

    #[test]
    fn float_keys_compare_by_bits() {
        let l = [0.0f64, f64::NAN];
        let r = [-0.0f64, f64::NAN];
        let lk = SingleKey::new(&l);
        let rk = SingleKey::new(&r);
        assert!(!lk.rows_equal(0, &rk, 0));
        assert!(lk.rows_equal(1, &rk, 1));
    }

    #[test]
    fn composite_rejects_ragged_columns() {
        let a = [1i32, 2];
        let b = [1i32];
        assert!(CompositeKey::new(vec![ColumnView::I32(&a), ColumnView::I32(&b)]).is_err());
        assert!(CompositeKey::new(Vec::new()).is_err());
    }

    #[test]
    fn composite_arity_is_bounded() {
        let a = [1i32];
        let widest = vec![ColumnView::I32(&a); MAX_KEY_COLUMNS];
        assert_eq!(CompositeKey::new(widest).unwrap().arity(), MAX_KEY_COLUMNS);
        let too_wide = vec![ColumnView::I32(&a); MAX_KEY_COLUMNS + 1];
        assert!(matches!(
            CompositeKey::new(too_wide),
            Err(DeviceError::InvalidValue(_))
        ));
    }

    #[test]
    fn mixed_type_composite_rows() {
        let ints = [1i32, 1];
        let floats = [10.0f32, 99.0];
        let left = CompositeKey::new(vec![ColumnView::I32(&ints[..1]), ColumnView::F32(&floats[..1])])
            .unwrap();
        let right = CompositeKey::new(vec![ColumnView::I32(&ints), ColumnView::F32(&floats)]).unwrap();
        assert!(left.rows_equal(0, &right, 0));
        assert!(!left.rows_equal(0, &right, 1));
        assert_eq!(left.hash_row(0), right.hash_row(0));
    }
}
