//! Row lifecycle and driver benchmarks.
//!
//! - Add/remove throughput by kind count
//! - Multi-pass annealing over a fixed log
//! - Kind-structure search, sequential vs worker pool

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use crosscats::testing::{mixed_schema, synthetic_log};
use crosscats::{CrossCat, Engine, EngineConfig, KindStructureParams};

fn engine(kind_count: usize, config: EngineConfig) -> Engine {
    let schema = mixed_schema(8, 4, 4);
    let partition: Vec<usize> = (0..schema.len()).map(|f| f % kind_count).collect();
    let cross_cat = CrossCat::from_partition(schema, &partition, config.empty_group_count, config.kind_alpha)
        .expect("every kind owns a feature");
    Engine::new(config, cross_cat)
}

// =============================================================================
// Row Lifecycle
// =============================================================================

/// Add then remove every row of a 1K log.
fn bench_add_remove(c: &mut Criterion) {
    let log = synthetic_log(&mixed_schema(8, 4, 4), 1_000, 4, 0.8, 42);
    let mut group = c.benchmark_group("lifecycle/add_remove");
    group.throughput(Throughput::Elements(log.len() as u64));

    for kind_count in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("kinds", kind_count), &kind_count, |b, &kind_count| {
            let mut engine = engine(kind_count, EngineConfig::default());
            b.iter(|| {
                for row in log.rows() {
                    black_box(engine.try_add_row(row));
                }
                for row in log.rows() {
                    engine.remove_row(row);
                }
            });
        });
    }

    group.finish();
}

// =============================================================================
// Drivers
// =============================================================================

fn bench_multi_pass(c: &mut Criterion) {
    let log = synthetic_log(&mixed_schema(8, 4, 4), 500, 4, 0.8, 42);
    let mut group = c.benchmark_group("drivers/multi_pass");
    group.sample_size(10);
    group.bench_function("500_rows_2_passes", |b| {
        b.iter(|| {
            let mut engine = engine(4, EngineConfig::default());
            engine.infer_multi_pass(black_box(&log), 2.0).unwrap();
            black_box(engine.assignments().len())
        });
    });
    group.finish();
}

fn bench_kind_structure(c: &mut Criterion) {
    let log = synthetic_log(&mixed_schema(8, 4, 4), 500, 4, 0.8, 42);
    let params = KindStructureParams {
        extra_passes: 1.0,
        ephemeral_kind_count: 4,
        iterations: 10,
    };
    let mut group = c.benchmark_group("drivers/kind_structure");
    group.sample_size(10);

    for workers in [0, 2, 4] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.iter(|| {
                let config = EngineConfig::builder().algorithm8_parallel(workers).build().unwrap();
                let mut engine = engine(4, config);
                engine.infer_kind_structure(black_box(&log), params).unwrap();
                black_box(engine.cross_cat().kind_count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_remove, bench_multi_pass, bench_kind_structure);
criterion_main!(benches);
