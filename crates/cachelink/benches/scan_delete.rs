//! Scan and bulk-delete throughput against the in-memory backend
//!
//! Measures the client-side cost of the cursor loop and batch partitioning,
//! plus registry lookups on the hot path.

use std::hint::black_box;
use std::sync::Arc;

use cachelink::{
    BulkDeleter, ConnectionHandle, ConnectionParameters, ConnectionRegistry, Connector,
    KeyScanner, TomlConfigProvider,
};
use cachelink_testing::{MockConnection, MockConnector};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

fn seeded(count: usize) -> (MockConnector, ConnectionHandle<MockConnection>) {
    let backend = MockConnector::new().with_keys((0..count).map(|i| format!("bench:{i:06}")));
    let conn = backend
        .connect(&ConnectionParameters::new("bench", 6379))
        .unwrap();
    (backend, ConnectionHandle::new(conn))
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for count in [1_000usize, 10_000, 50_000] {
        group.throughput(Throughput::Elements(count as u64));
        let (_backend, conn) = seeded(count);

        for page in [100usize, 5_000] {
            let scanner = KeyScanner::new().with_count(page);
            group.bench_with_input(
                BenchmarkId::new(format!("count_{page}"), count),
                &count,
                |b, _| b.iter(|| black_box(scanner.scan(&conn, "bench:*").unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_matching");

    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        for batch_size in [100usize, 1_000] {
            let deleter = BulkDeleter::new().with_batch_size(batch_size);
            group.bench_with_input(
                BenchmarkId::new(format!("batch_{batch_size}"), count),
                &count,
                |b, &count| {
                    b.iter_batched(
                        || seeded(count),
                        |(_backend, conn)| black_box(deleter.delete_matching(&conn, "bench:*").unwrap()),
                        BatchSize::SmallInput,
                    )
                },
            );
        }
    }

    group.finish();
}

fn bench_acquire(c: &mut Criterion) {
    let config = TomlConfigProvider::from_toml_str("[default]\nhostname = \"bench\"\n").unwrap();
    let registry = ConnectionRegistry::new(MockConnector::new(), Arc::new(config));
    registry.acquire("default", 0).unwrap();

    c.bench_function("registry_acquire_fresh", |b| {
        b.iter(|| black_box(registry.acquire("default", 0).unwrap()))
    });
}

criterion_group!(benches, bench_scan, bench_delete, bench_acquire);
criterion_main!(benches);
