use anyhow::{Context, Result};
use gpu_join_core::{api, Column, DType, EngineConfig, JoinEngine, JoinKind, JoinStatus};
use std::time::Instant;
use tracing::{info, Level};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("GPU Join Engine - Rust Examples");

    // Example 1: Single-column joins
    single_column_example()?;

    // Example 2: Composite keys
    composite_key_example()?;

    // Example 3: Status codes
    status_code_example()?;

    // Example 4: Memory configuration
    memory_config_example()?;

    Ok(())
}

fn single_column_example() -> Result<()> {
    info!("=== Example 1: Single-column joins ===");

    let engine = JoinEngine::new(EngineConfig::default())?;
    let orders = engine.device().htod_copy::<i32>(&[10, 11, 10, 12, 99])?;
    let customers = engine.device().htod_copy::<i32>(&[10, 11, 12, 13])?;

    for kind in [JoinKind::Inner, JoinKind::Left, JoinKind::Outer] {
        let result = engine
            .join(kind, &[Column::from(&orders)], &[Column::from(&customers)])
            .with_context(|| format!("{} join failed", kind))?;
        info!("{} join: {} pairs", kind, result.total_pairs());
        for (order, customer) in result.pairs()? {
            info!("  order {:>2} -> customer {:>2}", order, customer);
        }
        result.release();
    }

    Ok(())
}

fn composite_key_example() -> Result<()> {
    info!("=== Example 2: Composite keys ===");

    let engine = JoinEngine::new(EngineConfig::default())?;
    let dev = engine.device();

    // (region, day) on both sides
    let sales_region = dev.htod_copy::<i16>(&[1, 1, 2, 3])?;
    let sales_day = dev.htod_copy::<i32>(&[19_000, 19_001, 19_000, 19_002])?;
    let budget_region = dev.htod_copy::<i16>(&[1, 2, 2])?;
    let budget_day = dev.htod_copy::<i32>(&[19_000, 19_000, 19_005])?;

    let left = [
        Column::from(&sales_region),
        Column::new(&sales_day, DType::Date32)?,
    ];
    let right = [
        Column::from(&budget_region),
        Column::new(&budget_day, DType::Date32)?,
    ];

    let result = engine.outer_join(&left, &right)?;
    info!("OUTER join on (region, day): {:?}", result.pairs()?);

    Ok(())
}

fn status_code_example() -> Result<()> {
    info!("=== Example 3: Status codes ===");

    let engine = JoinEngine::new(EngineConfig::default())?;
    let a = engine.device().htod_copy::<i64>(&[1, 2])?;
    let b = engine.device().htod_copy::<f64>(&[1.0, 2.0])?;

    let (status, _) = api::join(&engine, 7, &[Column::from(&a)], &[Column::from(&a)]);
    info!("kind code 7: {}", status);

    let (status, _) = api::join(&engine, 0, &[Column::from(&a)], &[Column::from(&b)]);
    info!("int64 vs float64 key: {}", status);

    let (status, result) = api::join(&engine, 1, &[Column::from(&a)], &[Column::from(&a)]);
    if let (JoinStatus::Success, Some(result)) = (status, result) {
        info!(
            "LEFT self-join: size {} at {}",
            api::result_size(&result),
            api::result_data(&result)
        );
        api::result_free(result);
    }

    Ok(())
}

fn memory_config_example() -> Result<()> {
    info!("=== Example 4: Memory configuration ===");

    let config = EngineConfig {
        // Limit device memory usage
        max_device_memory: 256 * 1024 * 1024, // 256MB

        // Denser hash tables trade probe length for memory
        target_load_factor: 0.75,

        threads_per_block: 128,
        ..EngineConfig::default()
    };
    let engine = JoinEngine::new(config.clone())?;

    info!("Engine configured with:");
    info!("  Max device memory: {} MB", config.max_device_memory / (1024 * 1024));
    info!("  Load factor: {}", config.target_load_factor);
    info!("  Threads per block: {}", config.threads_per_block);

    let keys: Vec<i64> = (0..1_000_000).map(|v| v % 50_000).collect();
    let left = engine.device().htod_copy::<i64>(&keys)?;
    let right = engine.device().htod_copy::<i64>(&keys[..100_000])?;

    let start = Instant::now();
    let result = engine.inner_join(&[Column::from(&left)], &[Column::from(&right)])?;
    info!(
        "INNER join of {} x {} rows: {} pairs in {:?}",
        keys.len(),
        100_000,
        result.total_pairs(),
        start.elapsed()
    );
    info!("Device memory in use: {} bytes", engine.device_memory_in_use());

    Ok(())
}
