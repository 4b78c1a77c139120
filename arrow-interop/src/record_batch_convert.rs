//! Conversion between Arrow `RecordBatch`es, device columns and join results.

use anyhow::{Context, Result};
use arrow_array::{Int32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;
use tracing::info;

use gpu_join_core::{Column, JoinEngine, JoinKind, JoinResult};
use gpu_memory_manager::GpuDevice;

use crate::column_buffer::DeviceColumn;
use crate::schema_utils::SchemaExt;

// ---------------------------------------------------------------------------
// Arrow → device
// ---------------------------------------------------------------------------

/// Upload every column of `batch` (one `DeviceColumn` per column).
pub fn record_batch_to_device_columns(
    device: &GpuDevice,
    batch: &RecordBatch,
) -> Result<Vec<DeviceColumn>> {
    let schema = batch.schema();
    schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, col)| {
            DeviceColumn::from_arrow(device, field.name().as_str(), col.as_ref())
                .with_context(|| format!("Converting column '{}'", field.name()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Join result → Arrow
// ---------------------------------------------------------------------------

/// Download `result` as `(left_index, right_index)` arrays; `-1` becomes null.
pub fn join_result_to_arrow(result: &JoinResult) -> Result<(Int32Array, Int32Array)> {
    let flat = result.to_host().context("Downloading join result")?;
    let (left, right) = flat.split_at(result.total_pairs());
    let to_array = |side: &[i32]| -> Int32Array {
        side.iter().map(|&i| (i >= 0).then_some(i)).collect()
    };
    Ok((to_array(left), to_array(right)))
}

pub fn join_result_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("left_index", DataType::Int32, true),
        Field::new("right_index", DataType::Int32, true),
    ]))
}

/// `join_result_to_arrow` packed into a two-column batch.
pub fn join_result_to_record_batch(result: &JoinResult) -> Result<RecordBatch> {
    let (left, right) = join_result_to_arrow(result)?;
    RecordBatch::try_new(join_result_schema(), vec![Arc::new(left), Arc::new(right)])
        .context("Building RecordBatch from join result")
}

/// Join two batches on named key columns and return the matching row indices.
pub fn join_record_batches(
    engine: &JoinEngine,
    kind: JoinKind,
    left: &RecordBatch,
    left_on: &[&str],
    right: &RecordBatch,
    right_on: &[&str],
) -> Result<RecordBatch> {
    left.schema()
        .is_join_key_compatible(left_on, &right.schema(), right_on)?;

    let left_keys = upload_keys(engine.device(), left, left_on)?;
    let right_keys = upload_keys(engine.device(), right, right_on)?;
    let left_cols = left_keys.iter().map(DeviceColumn::as_column).collect::<Result<Vec<_>>>()?;
    let right_cols = right_keys.iter().map(DeviceColumn::as_column).collect::<Result<Vec<_>>>()?;

    let result = engine
        .join(kind, &left_cols, &right_cols)
        .with_context(|| format!("{} join on {:?} = {:?}", kind, left_on, right_on))?;
    info!(
        "{} join of {} x {} rows produced {} pairs",
        kind,
        left.num_rows(),
        right.num_rows(),
        result.total_pairs()
    );
    join_result_to_record_batch(&result)
}

fn upload_keys(device: &GpuDevice, batch: &RecordBatch, names: &[&str]) -> Result<Vec<DeviceColumn>> {
    names
        .iter()
        .map(|name| {
            let array = batch
                .column_by_name(name)
                .with_context(|| format!("Column '{}' not found", name))?;
            DeviceColumn::from_arrow(device, *name, array.as_ref())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
