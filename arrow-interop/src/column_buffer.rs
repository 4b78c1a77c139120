//! An owned, device-resident column uploaded from Arrow.

use anyhow::{bail, Context, Result};
use arrow_array::{
    Array, Date32Array, Date64Array, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow_buffer::bit_util;
use arrow_schema::{DataType, TimeUnit as ArrowTimeUnit};
use tracing::debug;

use gpu_join_core::{Column, ColumnData, DType, DTypeExtra, TimeUnit};
use gpu_memory_manager::{DeviceBuffer, GpuDevice};

/// Map an Arrow type to the engine's dtype.
pub fn dtype_from_arrow(dt: &DataType) -> Result<(DType, DTypeExtra)> {
    let plain = |dtype: DType| -> Result<(DType, DTypeExtra)> { Ok((dtype, DTypeExtra::default())) };
    match dt {
        DataType::Int8 => plain(DType::Int8),
        DataType::Int16 => plain(DType::Int16),
        DataType::Int32 => plain(DType::Int32),
        DataType::Int64 => plain(DType::Int64),
        DataType::UInt8 => plain(DType::UInt8),
        DataType::UInt16 => plain(DType::UInt16),
        DataType::UInt32 => plain(DType::UInt32),
        DataType::UInt64 => plain(DType::UInt64),
        DataType::Float32 => plain(DType::Float32),
        DataType::Float64 => plain(DType::Float64),
        DataType::Date32 => plain(DType::Date32),
        DataType::Date64 => Ok((
            DType::Date64,
            DTypeExtra {
                time_unit: Some(TimeUnit::Millisecond),
            },
        )),
        DataType::Timestamp(unit, _) => Ok((
            DType::Timestamp,
            DTypeExtra {
                time_unit: Some(match unit {
                    ArrowTimeUnit::Second => TimeUnit::Second,
                    ArrowTimeUnit::Millisecond => TimeUnit::Millisecond,
                    ArrowTimeUnit::Microsecond => TimeUnit::Microsecond,
                    ArrowTimeUnit::Nanosecond => TimeUnit::Nanosecond,
                }),
            },
        )),
        other => bail!("Unsupported Arrow DataType for a join key: {:?}", other),
    }
}

/// Owned device buffer of one storage type.
#[derive(Debug)]
pub enum DeviceValues {
    I8(DeviceBuffer<i8>),
    I16(DeviceBuffer<i16>),
    I32(DeviceBuffer<i32>),
    I64(DeviceBuffer<i64>),
    F32(DeviceBuffer<f32>),
    F64(DeviceBuffer<f64>),
}

impl DeviceValues {
    pub fn len(&self) -> usize {
        self.as_data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_data(&self) -> ColumnData<'_> {
        match self {
            DeviceValues::I8(b) => ColumnData::I8(b),
            DeviceValues::I16(b) => ColumnData::I16(b),
            DeviceValues::I32(b) => ColumnData::I32(b),
            DeviceValues::I64(b) => ColumnData::I64(b),
            DeviceValues::F32(b) => ColumnData::F32(b),
            DeviceValues::F64(b) => ColumnData::F64(b),
        }
    }
}

/// A named column whose values (and validity, if any) live on the device.
#[derive(Debug)]
pub struct DeviceColumn {
    name: String,
    values: DeviceValues,
    validity: Option<DeviceBuffer<u8>>,
    dtype: DType,
    dtype_extra: DTypeExtra,
    null_count: usize,
}

macro_rules! upload {
    ($device:expr, $array:expr, $arrow:ty => $variant:ident($t:ty)) => {{
        let a = $array
            .as_any()
            .downcast_ref::<$arrow>()
            .context(concat!("expected ", stringify!($arrow)))?;
        let values: Vec<$t> = a.values().iter().map(|&v| v as $t).collect();
        DeviceValues::$variant($device.htod_copy::<$t>(&values)?)
    }};
}

impl DeviceColumn {
    /// Upload `array` to `device`.
    pub fn from_arrow(device: &GpuDevice, name: impl Into<String>, array: &dyn Array) -> Result<Self> {
        let name = name.into();
        let (dtype, dtype_extra) = dtype_from_arrow(array.data_type())?;

        let values = match array.data_type() {
            DataType::Int8 => upload!(device, array, Int8Array => I8(i8)),
            DataType::Int16 => upload!(device, array, Int16Array => I16(i16)),
            DataType::Int32 => upload!(device, array, Int32Array => I32(i32)),
            DataType::Int64 => upload!(device, array, Int64Array => I64(i64)),
            DataType::UInt8 => upload!(device, array, UInt8Array => I8(i8)),
            DataType::UInt16 => upload!(device, array, UInt16Array => I16(i16)),
            DataType::UInt32 => upload!(device, array, UInt32Array => I32(i32)),
            DataType::UInt64 => upload!(device, array, UInt64Array => I64(i64)),
            DataType::Float32 => upload!(device, array, Float32Array => F32(f32)),
            DataType::Float64 => upload!(device, array, Float64Array => F64(f64)),
            DataType::Date32 => upload!(device, array, Date32Array => I32(i32)),
            DataType::Date64 => upload!(device, array, Date64Array => I64(i64)),
            DataType::Timestamp(ArrowTimeUnit::Second, _) => {
                upload!(device, array, TimestampSecondArray => I64(i64))
            }
            DataType::Timestamp(ArrowTimeUnit::Millisecond, _) => {
                upload!(device, array, TimestampMillisecondArray => I64(i64))
            }
            DataType::Timestamp(ArrowTimeUnit::Microsecond, _) => {
                upload!(device, array, TimestampMicrosecondArray => I64(i64))
            }
            DataType::Timestamp(ArrowTimeUnit::Nanosecond, _) => {
                upload!(device, array, TimestampNanosecondArray => I64(i64))
            }
            other => bail!("Unsupported Arrow DataType for a join key: {:?}", other),
        };

        let null_count = array.null_count();
        let validity = if null_count > 0 {
            let mut bits = vec![0u8; array.len().div_ceil(8)];
            for i in (0..array.len()).filter(|&i| array.is_valid(i)) {
                bit_util::set_bit(&mut bits, i);
            }
            Some(device.htod_copy::<u8>(&bits)?)
        } else {
            None
        };

        debug!(
            "Uploaded column '{}': {} rows of {} ({} nulls)",
            name,
            values.len(),
            dtype,
            null_count
        );
        Ok(Self {
            name,
            values,
            validity,
            dtype,
            dtype_extra,
            null_count,
        })
    }

    /// Borrow as a join key column.
    pub fn as_column(&self) -> Result<Column<'_>> {
        let column = Column::new(self.values.as_data(), self.dtype)
            .with_context(|| format!("column '{}'", self.name))?
            .with_dtype_extra(self.dtype_extra);
        match &self.validity {
            Some(mask) => Ok(column.with_validity(mask)?),
            None => Ok(column),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dtype_extra(&self) -> DTypeExtra {
        self.dtype_extra
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn values(&self) -> &DeviceValues {
        &self.values
    }

    pub fn validity(&self) -> Option<&DeviceBuffer<u8>> {
        self.validity.as_ref()
    }
}
