//! Ref Benchmarks - Single Thread Cost Model
//!
//! ## Benchmark Groups
//!
//! | Benchmark | What it measures |
//! |-----------|------------------|
//! | atomic/* | Orec-only operations, no transaction |
//! | txn_read/* | Read-only transactions per flavor |
//! | txn_write/* | Read-modify-write commits |
//! | read_set/* | Commit cost as the read set grows |
//!
//! ## Running
//!
//! ```bash
//! cargo bench --bench ref_benchmarks
//! cargo bench --bench ref_benchmarks -- "read_set"
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gammastm::{GammaLongRef, GammaStm, IsolationLevel};
use std::time::Duration;

// =============================================================================
// Atomic Operations
// =============================================================================

fn atomic_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic");
    group.throughput(Throughput::Elements(1));

    let stm = GammaStm::new();
    let value = stm.new_long_ref(0);

    group.bench_function("get", |b| b.iter(|| black_box(value.atomic_get().unwrap())));
    group.bench_function("weak_get", |b| b.iter(|| black_box(value.atomic_weak_get())));
    group.bench_function("increment_and_get", |b| {
        b.iter(|| black_box(value.atomic_increment_and_get(1).unwrap()))
    });
    group.bench_function("compare_and_set_miss", |b| {
        b.iter(|| black_box(value.atomic_compare_and_set(-1, 0).unwrap()))
    });

    group.finish();
}

// =============================================================================
// Transactions
// =============================================================================

fn txn_read_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_read");
    group.throughput(Throughput::Elements(1));

    let stm = GammaStm::new();
    let value = stm.new_long_ref(42);

    let speculative = stm.default_txn_executor();
    group.bench_function("lean_mono", |b| {
        b.iter(|| black_box(speculative.execute(|txn| value.get(txn)).unwrap()))
    });

    let fat = stm
        .new_txn_factory_builder()
        .force_fat(true)
        .new_txn_executor()
        .unwrap();
    group.bench_function("fat_mono", |b| {
        b.iter(|| black_box(fat.execute(|txn| value.get(txn)).unwrap()))
    });

    let readonly = stm
        .new_txn_factory_builder()
        .readonly(true)
        .new_txn_executor()
        .unwrap();
    group.bench_function("readonly", |b| {
        b.iter(|| black_box(readonly.execute(|txn| value.get(txn)).unwrap()))
    });

    group.finish();
}

fn txn_write_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("txn_write");
    group.throughput(Throughput::Elements(1));

    let stm = GammaStm::new();
    let value = stm.new_long_ref(0);
    let executor = stm.default_txn_executor();

    group.bench_function("increment_and_get", |b| {
        b.iter(|| black_box(executor.execute(|txn| value.increment_and_get(txn, 1)).unwrap()))
    });
    group.bench_function("commuting_increment", |b| {
        b.iter(|| executor.execute(|txn| value.increment(txn)).unwrap())
    });

    let serializable = stm
        .new_txn_factory_builder()
        .isolation_level(IsolationLevel::Serializable)
        .new_txn_executor()
        .unwrap();
    group.bench_function("serializable_increment", |b| {
        b.iter(|| black_box(serializable.execute(|txn| value.increment_and_get(txn, 1)).unwrap()))
    });

    group.finish();
}

// =============================================================================
// Read Set Scaling
// =============================================================================

fn read_set_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_set");

    for size in [1usize, 4, 16, 64] {
        let stm = GammaStm::new();
        let refs: Vec<GammaLongRef> = (0..size).map(|i| stm.new_long_ref(i as i64)).collect();
        let executor = stm.default_txn_executor();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sum", size), &refs, |b, refs| {
            b.iter(|| {
                let total = executor
                    .execute(|txn| {
                        let mut total = 0i64;
                        for value in refs {
                            total += value.get(txn)?;
                        }
                        Ok(total)
                    })
                    .unwrap();
                black_box(total)
            })
        });
    }

    group.finish();
}

criterion_group!(
    name = single_thread;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = atomic_benchmarks, txn_read_benchmarks, txn_write_benchmarks, read_set_benchmarks
);

criterion_main!(single_thread);
