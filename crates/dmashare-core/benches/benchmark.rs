//! Performance benchmarks for dmashare
//!
//! Run with: cargo bench --package dmashare-core
//! Set DMASHARE_HEAP=ion or dma-heap to measure a device heap.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dmashare_core::{HeapKind, Platform, SharedBuffer, SyncDirection};

fn platform() -> Platform {
    let kind = std::env::var(dmashare_core::heap::HEAP_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(HeapKind::Memfd);
    Platform::new(kind.open().unwrap())
}

fn bench_allocate_release(c: &mut Criterion) {
    let platform = platform();
    let mut group = c.benchmark_group("allocate_release");

    for size in [4096, 65536, 1048576, 8294400].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut buf = SharedBuffer::allocate(&platform, size).unwrap();
                buf.release().unwrap();
                black_box(buf);
            });
        });
    }
    group.finish();
}

fn bench_import(c: &mut Criterion) {
    let platform = platform();
    let buf = SharedBuffer::allocate(&platform, 1048576).unwrap();
    let desc = buf.descriptor();

    c.bench_function("import", |b| {
        b.iter(|| {
            let handle = buf.try_clone_handle().unwrap();
            let view = SharedBuffer::import(&platform, handle, desc.len, desc.mapped_len).unwrap();
            black_box(view);
        });
    });
}

fn bench_sync_pair(c: &mut Criterion) {
    let platform = platform();
    let mut group = c.benchmark_group("sync_pair");

    for size in [4096, 1048576, 8294400].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut buf = SharedBuffer::allocate(&platform, size).unwrap();
            b.iter(|| {
                buf.as_mut_slice().unwrap()[0] = 1;
                buf.sync(SyncDirection::ToDevice).unwrap();
                buf.sync(SyncDirection::FromDevice).unwrap();
                black_box(buf.as_slice().unwrap()[0]);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allocate_release, bench_import, bench_sync_pair);
criterion_main!(benches);
