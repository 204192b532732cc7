//! Allocator benchmarks
//!
//! Compares the small-block allocator against `std::alloc::System` under
//! request/response, temporary-buffer, and object-lifecycle patterns.

use std::alloc::{Layout, System, GlobalAlloc};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use smallblock_alloc::{Config, SmallBlockAllocator, Warmup};

fn small_allocator() -> SmallBlockAllocator {
    let config = Config::builder(16, 16 * 1024 * 1024)
        .default_warmup(Warmup::Hot)
        .default_capacities(&[128; 16])
        .build();
    let alloc = SmallBlockAllocator::new(config).unwrap();
    alloc.create_default_thread_cache();
    alloc
}

/// Simulate a request/response cycle: two allocations, used, then freed.
fn bench_request_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_response");
    group.throughput(Throughput::Elements(2));

    group.bench_function("smallblock", |b| {
        let alloc = small_allocator();
        b.iter(|| {
            let req = alloc.allocate(256, 8);
            unsafe { std::ptr::write_bytes(req, 0x42, 256) };
            let resp = alloc.allocate(256, 8);
            unsafe { std::ptr::write_bytes(resp, 0x24, 256) };
            black_box((req, resp));
            alloc.free(req);
            alloc.free(resp);
        });
    });

    group.bench_function("system", |b| {
        let layout = Layout::from_size_align(256, 8).unwrap();
        b.iter(|| unsafe {
            let req = System.alloc(layout);
            std::ptr::write_bytes(req, 0x42, 256);
            let resp = System.alloc(layout);
            std::ptr::write_bytes(resp, 0x24, 256);
            black_box((req, resp));
            System.dealloc(req, layout);
            System.dealloc(resp, layout);
        });
    });

    group.finish();
}

/// Simulate temporary buffer allocations of varying size, as in a parser.
fn bench_temporary_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("temporary_buffers");

    group.bench_function("smallblock", |b| {
        let alloc = small_allocator();
        b.iter(|| {
            let buf1 = alloc.allocate(512, 8);
            let buf2 = alloc.allocate(1024, 8);
            let buf3 = alloc.allocate(256, 8);
            black_box((buf1, buf2, buf3));
            alloc.free(buf1);
            alloc.free(buf2);
            alloc.free(buf3);
        });
    });

    group.bench_function("system", |b| {
        b.iter(|| unsafe {
            let l1 = Layout::from_size_align(512, 8).unwrap();
            let l2 = Layout::from_size_align(1024, 8).unwrap();
            let l3 = Layout::from_size_align(256, 8).unwrap();
            let buf1 = System.alloc(l1);
            let buf2 = System.alloc(l2);
            let buf3 = System.alloc(l3);
            black_box((buf1, buf2, buf3));
            System.dealloc(buf1, l1);
            System.dealloc(buf2, l2);
            System.dealloc(buf3, l3);
        });
    });

    group.finish();
}

/// Simulate object creation/destruction in a batch of 10, a common pool
/// access pattern.
fn bench_object_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_lifecycle");
    group.throughput(Throughput::Elements(10));

    group.bench_function("smallblock", |b| {
        let alloc = small_allocator();
        b.iter(|| {
            let mut objects = Vec::with_capacity(10);
            for i in 0..10 {
                let obj = alloc.allocate(128, 8);
                unsafe { std::ptr::write_bytes(obj, i as u8, 128) };
                objects.push(obj);
            }
            for obj in objects {
                alloc.free(obj);
            }
        });
    });

    group.bench_function("system", |b| {
        let layout = Layout::from_size_align(128, 8).unwrap();
        b.iter(|| unsafe {
            let mut objects = Vec::with_capacity(10);
            for i in 0..10 {
                let obj = System.alloc(layout);
                std::ptr::write_bytes(obj, i as u8, 128);
                objects.push(obj);
            }
            for obj in objects {
                System.dealloc(obj, layout);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_response,
    bench_temporary_buffers,
    bench_object_lifecycle
);
criterion_main!(benches);
