//! Benchmarks for the join pipeline.
//!
//! Run with:  `cargo bench -p gpu-join-core`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gpu_join_core::{Column, EngineConfig, JoinEngine, JoinKind};

/// Deterministic keys in `0..domain`.
fn keys(n: usize, domain: i64, seed: u64) -> Vec<i64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as i64) % domain
        })
        .collect()
}

fn bench_single_column(c: &mut Criterion) {
    let engine = JoinEngine::new(EngineConfig::default()).unwrap();
    let mut group = c.benchmark_group("join_single_column");

    for rows in [10_000usize, 100_000] {
        let left = engine.device().htod_copy::<i64>(&keys(rows, rows as i64, 1)).unwrap();
        let right = engine.device().htod_copy::<i64>(&keys(rows / 4, rows as i64, 2)).unwrap();
        group.throughput(Throughput::Elements(rows as u64));

        for kind in [JoinKind::Inner, JoinKind::Left, JoinKind::Outer] {
            group.bench_with_input(BenchmarkId::new(kind.to_string(), rows), &kind, |b, &kind| {
                b.iter(|| {
                    let result = engine
                        .join(kind, &[Column::from(&left)], &[Column::from(&right)])
                        .unwrap();
                    black_box(result.total_pairs());
                })
            });
        }
    }
    group.finish();
}

fn bench_composite_key(c: &mut Criterion) {
    let engine = JoinEngine::new(EngineConfig::default()).unwrap();
    let rows = 50_000;
    let l0 = engine.device().htod_copy::<i64>(&keys(rows, 1_000, 3)).unwrap();
    let l1 = engine.device().htod_copy::<i64>(&keys(rows, 64, 4)).unwrap();
    let r0 = engine.device().htod_copy::<i64>(&keys(rows, 1_000, 5)).unwrap();
    let r1 = engine.device().htod_copy::<i64>(&keys(rows, 64, 6)).unwrap();

    c.bench_function("left_join_two_column_50k", |b| {
        b.iter(|| {
            let result = engine
                .left_join(
                    &[Column::from(&l0), Column::from(&l1)],
                    &[Column::from(&r0), Column::from(&r1)],
                )
                .unwrap();
            black_box(result.total_pairs());
        })
    });
}

criterion_group!(benches, bench_single_column, bench_composite_key);
criterion_main!(benches);
