//! YCSB-style benchmark for the pool-resident index.
//!
//! Measures insert, read, and mixed workloads against a freshly mapped
//! pool in a temp directory.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::prelude::*;

use strata::config::IndexOptions;
use strata::size::GIB;
use strata::{MappedPool, StrataIndex};

type BenchIndex = StrataIndex<u64, u64, MappedPool>;

/// Create a bench index backed by a temp pool file.
fn create_index(hash_power: u32) -> (tempfile::TempDir, BenchIndex) {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(MappedPool::create(dir.path().join("bench.pool"), GIB).unwrap());
    let index = StrataIndex::create(pool, &IndexOptions::new(hash_power, 3)).unwrap();
    (dir, index)
}

/// Benchmark pure insert performance
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    let (_dir, index) = create_index(16);
    let mut key = 0u64;

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let inserted = index.insert(black_box(key), black_box(key * 10)).unwrap();
            key += 1;
            inserted
        })
    });

    group.finish();
}

/// Benchmark pure read performance (after population)
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    let (_dir, index) = create_index(16);

    let num_keys = 100_000u64;
    for i in 0..num_keys {
        index.insert(i, i * 10).unwrap();
    }

    let mut rng = rand::thread_rng();

    group.bench_function("random", |b| {
        b.iter(|| {
            let key = rng.gen_range(0..num_keys);
            index.find(black_box(&key)).map(|entry| *entry.value())
        })
    });

    group.finish();
}

/// Benchmark mixed workload (50% read, 50% insert of fresh keys)
fn bench_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_50_50");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    let (_dir, index) = create_index(16);

    let populated = 100_000u64;
    for i in 0..populated {
        index.insert(i, i).unwrap();
    }

    let mut rng = rand::thread_rng();
    let mut next_key = populated;

    group.bench_function("read_insert", |b| {
        b.iter(|| {
            if rng.gen_bool(0.5) {
                let key = rng.gen_range(0..populated);
                index.contains(black_box(&key))
            } else {
                let key = next_key;
                next_key += 1;
                index.insert(black_box(key), black_box(key)).unwrap()
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_read, bench_mixed);
criterion_main!(benches);
