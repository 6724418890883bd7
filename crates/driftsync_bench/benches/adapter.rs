//! Storage adapter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use driftsync_bench::{entity, generate_entities};
use driftsync_core::{AdapterConfig, EntityStore};
use driftsync_store::{DocumentStore, FileStore, InMemoryStore, StoreHandle};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn memory_adapter() -> EntityStore {
    let handle = Arc::new(StoreHandle::new(Arc::new(InMemoryStore::new())));
    EntityStore::new(handle, AdapterConfig::for_kind("task").unwrap()).unwrap()
}

fn adapter_over(store: Arc<dyn DocumentStore>) -> EntityStore {
    let handle = Arc::new(StoreHandle::new(store));
    EntityStore::new(handle, AdapterConfig::for_kind("task").unwrap()).unwrap()
}

/// Benchmark single saves that update an existing entity.
fn bench_save(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("save");

    for fields in [4, 32].iter() {
        group.bench_with_input(BenchmarkId::new("memory", fields), fields, |b, &fields| {
            let adapter = memory_adapter();
            let entity = entity(1, fields, 0);
            b.to_async(&rt).iter(|| async {
                black_box(adapter.save(&entity).await.unwrap());
            });
        });
    }

    group.sample_size(30);
    group.bench_function("file", |b| {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(&temp_dir.path().join("replica.cbor")).unwrap();
        let adapter = adapter_over(Arc::new(store));
        let entity = entity(1, 8, 0);
        b.to_async(&rt).iter(|| async {
            black_box(adapter.save(&entity).await.unwrap());
        });
    });

    group.finish();
}

/// Benchmark batched saves.
fn bench_save_many(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("save_many");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let adapter = memory_adapter();
            let entities = generate_entities(count, 8);
            b.to_async(&rt).iter(|| async {
                black_box(adapter.save_many(&entities).await.unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark loading every entity of a kind.
fn bench_load_all(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("load_all");

    for count in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let adapter = memory_adapter();
            rt.block_on(adapter.save_many(&generate_entities(count, 8))).unwrap();
            b.to_async(&rt).iter(|| async {
                black_box(adapter.load_all().await.unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark an orphan sweep that finds nothing to remove.
fn bench_sweep_noop(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let adapter = memory_adapter();
    rt.block_on(adapter.save_many(&generate_entities(1000, 4))).unwrap();
    let keep: HashSet<String> = (0..1000).map(|i| i.to_string()).collect();

    c.bench_function("sync_deleted_noop_1000", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(adapter.sync_deleted(&keep).await.unwrap());
        });
    });
}

criterion_group!(benches, bench_save, bench_save_many, bench_load_all, bench_sweep_noop);
criterion_main!(benches);
