use anyhow::{ensure, Context, Result};
use std::sync::Arc;
use tracing::info;

use gpu_memory_manager::{DeviceConfig, GpuDevice};

pub mod api;
pub mod column;
pub mod driver;
pub mod join_kind;
pub mod result;
pub mod status;

pub use column::{Column, ColumnData, DType, DTypeExtra, StorageType, TimeUnit};
pub use join_kind::JoinKind;
pub use result::JoinResult;
pub use status::{JoinError, JoinStatus};

use driver::JoinOptions;

/// Smallest accepted hash table load factor.
pub const MIN_LOAD_FACTOR: f64 = 0.01;

/// Main join engine
pub struct JoinEngine {
    device: Arc<GpuDevice>,
    config: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device id
    pub device_ordinal: usize,
    /// Maximum device memory to use (bytes)
    pub max_device_memory: usize,
    /// Threads per block for kernel launches
    pub threads_per_block: u32,
    /// Hash table load factor, in [MIN_LOAD_FACTOR, 1]
    pub target_load_factor: f64,
    /// Accept INNER joins on 2-3 column keys
    pub allow_multi_column_inner: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_ordinal: 0,
            max_device_memory: 8 * 1024 * 1024 * 1024, // 8GB
            threads_per_block: 256,
            target_load_factor: 0.5,
            allow_multi_column_inner: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.target_load_factor >= MIN_LOAD_FACTOR && self.target_load_factor <= 1.0,
            "target_load_factor must be in [{}, 1], got {}",
            MIN_LOAD_FACTOR,
            self.target_load_factor
        );
        ensure!(self.threads_per_block > 0, "threads_per_block must be non-zero");
        ensure!(self.max_device_memory > 0, "max_device_memory must be non-zero");
        Ok(())
    }
}

impl JoinEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;
        let device = GpuDevice::new(DeviceConfig {
            ordinal: config.device_ordinal,
            memory_limit: config.max_device_memory,
            threads_per_block: config.threads_per_block,
        })
        .context("failed to initialize device")?;
        info!(
            "Join engine ready (load factor {}, multi-column INNER {})",
            config.target_load_factor,
            if config.allow_multi_column_inner { "enabled" } else { "disabled" }
        );
        Ok(Self {
            device: Arc::new(device),
            config,
        })
    }

    /// Join `left` with `right` on equal key rows.
    ///
    /// Runs on a fresh stream and blocks until the result is complete. On
    /// error, no device memory from this call remains allocated.
    pub fn join(
        &self,
        kind: JoinKind,
        left: &[Column<'_>],
        right: &[Column<'_>],
    ) -> status::Result<JoinResult> {
        info!(
            "{} join: {}-column key, {} left rows, {} right rows",
            kind,
            left.len(),
            left.first().map_or(0, Column::size),
            right.first().map_or(0, Column::size)
        );
        let stream = self.device.create_stream();
        let buffer = driver::execute(&stream, kind, left, right, self.options())?;
        let result = JoinResult::new(buffer, stream);
        info!("{} join produced {} pairs", kind, result.total_pairs());
        Ok(result)
    }

    pub fn inner_join(&self, left: &[Column<'_>], right: &[Column<'_>]) -> status::Result<JoinResult> {
        self.join(JoinKind::Inner, left, right)
    }

    pub fn left_join(&self, left: &[Column<'_>], right: &[Column<'_>]) -> status::Result<JoinResult> {
        self.join(JoinKind::Left, left, right)
    }

    pub fn outer_join(&self, left: &[Column<'_>], right: &[Column<'_>]) -> status::Result<JoinResult> {
        self.join(JoinKind::Outer, left, right)
    }

    /// Device the engine allocates on; upload key columns through it.
    pub fn device(&self) -> &Arc<GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bytes currently allocated on the engine's device.
    pub fn device_memory_in_use(&self) -> usize {
        self.device.memory_in_use()
    }

    fn options(&self) -> JoinOptions {
        JoinOptions {
            load_factor: self.config.target_load_factor,
            allow_multi_column_inner: self.config.allow_multi_column_inner,
        }
    }
}
