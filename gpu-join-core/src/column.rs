//! Device-resident columns.
//!
//! A [`Column`] borrows a typed device buffer and describes it; it owns no
//! device memory. All columns of one join side must have the same length.

use std::fmt;

use gpu_join_kernels::{ColumnView, ScalarType};
use gpu_memory_manager::DeviceBuffer;

use crate::status::{JoinError, Result};

/// Device storage type of a column.
pub type StorageType = ScalarType;

/// Logical element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Days since the epoch, stored as int32.
    Date32,
    /// Milliseconds since the epoch, stored as int64.
    Date64,
    /// Stored as int64 in the unit given by [`DTypeExtra::time_unit`].
    Timestamp,
}

impl DType {
    /// Storage used on the device.
    ///
    /// Unsigned types share the signed storage of the same width, so
    /// unsigned values above the signed range compare as their
    /// two's-complement reinterpretation.
    pub fn storage(self) -> StorageType {
        match self {
            DType::Int8 | DType::UInt8 => ScalarType::I8,
            DType::Int16 | DType::UInt16 => ScalarType::I16,
            DType::Int32 | DType::UInt32 | DType::Date32 => ScalarType::I32,
            DType::Int64 | DType::UInt64 | DType::Date64 | DType::Timestamp => ScalarType::I64,
            DType::Float32 => ScalarType::F32,
            DType::Float64 => ScalarType::F64,
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, DType::Date32 | DType::Date64 | DType::Timestamp)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Date32 => "date32",
            DType::Date64 => "date64",
            DType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

/// Auxiliary type metadata. Carried through, never consulted by matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DTypeExtra {
    pub time_unit: Option<TimeUnit>,
}

/// Borrowed device buffer of one storage type.
#[derive(Debug, Clone, Copy)]
pub enum ColumnData<'a> {
    I8(&'a DeviceBuffer<i8>),
    I16(&'a DeviceBuffer<i16>),
    I32(&'a DeviceBuffer<i32>),
    I64(&'a DeviceBuffer<i64>),
    F32(&'a DeviceBuffer<f32>),
    F64(&'a DeviceBuffer<f64>),
}

impl<'a> ColumnData<'a> {
    pub fn storage(&self) -> StorageType {
        self.view().scalar_type()
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::I8(b) => b.len(),
            ColumnData::I16(b) => b.len(),
            ColumnData::I32(b) => b.len(),
            ColumnData::I64(b) => b.len(),
            ColumnData::F32(b) => b.len(),
            ColumnData::F64(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kernel-side view of the values.
    pub fn view(&self) -> ColumnView<'a> {
        match *self {
            ColumnData::I8(b) => ColumnView::I8(b.as_slice()),
            ColumnData::I16(b) => ColumnView::I16(b.as_slice()),
            ColumnData::I32(b) => ColumnView::I32(b.as_slice()),
            ColumnData::I64(b) => ColumnView::I64(b.as_slice()),
            ColumnData::F32(b) => ColumnView::F32(b.as_slice()),
            ColumnData::F64(b) => ColumnView::F64(b.as_slice()),
        }
    }
}

macro_rules! column_data_from {
    ($($t:ty => $variant:ident, $dtype:ident);* $(;)?) => {
        $(
            impl<'a> From<&'a DeviceBuffer<$t>> for ColumnData<'a> {
                fn from(buf: &'a DeviceBuffer<$t>) -> Self {
                    ColumnData::$variant(buf)
                }
            }

            impl<'a> From<&'a DeviceBuffer<$t>> for Column<'a> {
                fn from(buf: &'a DeviceBuffer<$t>) -> Self {
                    Column {
                        data: ColumnData::$variant(buf),
                        valid: None,
                        dtype: DType::$dtype,
                        dtype_extra: DTypeExtra::default(),
                    }
                }
            }
        )*
    };
}

column_data_from! {
    i8 => I8, Int8;
    i16 => I16, Int16;
    i32 => I32, Int32;
    i64 => I64, Int64;
    f32 => F32, Float32;
    f64 => F64, Float64;
}

/// One typed device array plus an optional validity bitmask.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    data: ColumnData<'a>,
    valid: Option<&'a DeviceBuffer<u8>>,
    dtype: DType,
    dtype_extra: DTypeExtra,
}

impl<'a> Column<'a> {
    /// Describe `data` as a column of `dtype`.
    pub fn new(data: impl Into<ColumnData<'a>>, dtype: DType) -> Result<Self> {
        let data = data.into();
        if data.storage() != dtype.storage() {
            return Err(JoinError::ColumnMismatch(format!(
                "{} column cannot be stored as {:?}",
                dtype,
                data.storage()
            )));
        }
        Ok(Self {
            data,
            valid: None,
            dtype,
            dtype_extra: DTypeExtra::default(),
        })
    }

    /// Attach a validity bitmask, one bit per row (LSB first).
    pub fn with_validity(mut self, mask: &'a DeviceBuffer<u8>) -> Result<Self> {
        let needed = self.size().div_ceil(8);
        if mask.len() < needed {
            return Err(JoinError::ColumnMismatch(format!(
                "validity mask of {} bytes is too short for {} rows",
                mask.len(),
                self.size()
            )));
        }
        self.valid = Some(mask);
        Ok(self)
    }

    pub fn with_dtype_extra(mut self, extra: DTypeExtra) -> Self {
        self.dtype_extra = extra;
        self
    }

    pub fn data(&self) -> ColumnData<'a> {
        self.data
    }

    pub fn valid(&self) -> Option<&'a DeviceBuffer<u8>> {
        self.valid
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dtype_extra(&self) -> DTypeExtra {
        self.dtype_extra
    }

    pub fn storage(&self) -> StorageType {
        self.data.storage()
    }

    pub fn view(&self) -> ColumnView<'a> {
        self.data.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_memory_manager::{DeviceConfig, GpuDevice};

    fn device() -> GpuDevice {
        GpuDevice::new(DeviceConfig::default()).unwrap()
    }

    #[test]
    fn unsigned_types_use_signed_storage() {
        assert_eq!(DType::UInt8.storage(), ScalarType::I8);
        assert_eq!(DType::UInt16.storage(), ScalarType::I16);
        assert_eq!(DType::UInt32.storage(), ScalarType::I32);
        assert_eq!(DType::UInt64.storage(), ScalarType::I64);
        assert_eq!(DType::Date32.storage(), ScalarType::I32);
        assert_eq!(DType::Timestamp.storage(), ScalarType::I64);
    }

    #[test]
    fn new_checks_storage() {
        let dev = device();
        let buf = dev.htod_copy::<i32>(&[1, 2, 3]).unwrap();
        let col = Column::new(&buf, DType::Date32).unwrap();
        assert_eq!(col.size(), 3);
        assert_eq!(col.dtype(), DType::Date32);
        assert!(col.valid().is_none());

        let err = Column::new(&buf, DType::Int64).unwrap_err();
        assert!(matches!(err, JoinError::ColumnMismatch(_)));
    }

    #[test]
    fn from_buffer_uses_native_dtype() {
        let dev = device();
        let buf = dev.htod_copy::<f64>(&[0.5]).unwrap();
        let col = Column::from(&buf);
        assert_eq!(col.dtype(), DType::Float64);
        assert_eq!(col.storage(), ScalarType::F64);
        assert!(matches!(col.view(), ColumnView::F64(v) if v == [0.5]));
    }

    #[test]
    fn validity_mask_must_cover_rows() {
        let dev = device();
        let values = dev.htod_copy::<i16>(&[0; 9]).unwrap();
        let short = dev.htod_copy::<u8>(&[0xff]).unwrap();
        let enough = dev.htod_copy::<u8>(&[0xff, 0x01]).unwrap();

        assert!(Column::from(&values).with_validity(&short).is_err());
        let col = Column::from(&values).with_validity(&enough).unwrap();
        assert_eq!(col.valid().map(|m| m.len()), Some(2));
    }

    #[test]
    fn dtype_extra_is_carried() {
        let dev = device();
        let buf = dev.htod_copy::<i64>(&[1_000]).unwrap();
        let extra = DTypeExtra {
            time_unit: Some(TimeUnit::Millisecond),
        };
        let col = Column::new(&buf, DType::Timestamp)
            .unwrap()
            .with_dtype_extra(extra);
        assert_eq!(col.dtype_extra(), extra);
        assert!(col.dtype().is_temporal());
    }
}
