//! Arrow <-> device column conversion for the join engine.
//!
//! Arrow primitive and temporal arrays are uploaded into device buffers of
//! their storage type; unsigned arrays are reinterpreted as the signed type
//! of the same width. Validity bitmaps are forwarded as packed bitmasks.
//!
//! Join results come back as a pair of nullable `Int32` index arrays:
//!
//! ```text
//! left_index:  [ 0, 1, null, ... ]
//! right_index: [ 4, null, 2, ... ]
//! ```
//!
//! where `null` stands for the `-1` "no matching row" sentinel.

pub mod column_buffer;
pub mod record_batch_convert;
pub mod schema_utils;

pub use column_buffer::{dtype_from_arrow, DeviceColumn};
pub use record_batch_convert::{
    join_record_batches, join_result_to_arrow, join_result_to_record_batch,
    record_batch_to_device_columns,
};
pub use schema_utils::SchemaExt;
