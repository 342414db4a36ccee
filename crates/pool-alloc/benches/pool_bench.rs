//! Pooled allocator benchmarks against the system allocator.

use std::{
    alloc::{GlobalAlloc as _, Layout, System},
    hint::black_box,
};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pool_alloc::FreeListAllocator;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[8, 24, 64, 128, 256, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        let allocator = FreeListAllocator::system();
        group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &sz| {
            b.iter(|| {
                let block = allocator.allocate(black_box(sz)).unwrap();
                unsafe { allocator.deallocate(black_box(block), sz).unwrap() };
            });
        });

        let layout = Layout::from_size_align(size, 8).unwrap();
        group.bench_with_input(BenchmarkId::new("system", size), &layout, |b, &layout| {
            b.iter(|| unsafe {
                let ptr = System.alloc(black_box(layout));
                System.dealloc(black_box(ptr), layout);
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    let allocator = FreeListAllocator::system();
    group.bench_function("pool/1000x32B", |b| {
        b.iter(|| {
            let blocks = (0..1000)
                .map(|_| allocator.allocate(32).unwrap())
                .collect::<Vec<_>>();
            for block in black_box(blocks) {
                unsafe { allocator.deallocate(block, 32).unwrap() };
            }
        });
    });

    let layout = Layout::from_size_align(32, 8).unwrap();
    group.bench_function("system/1000x32B", |b| {
        b.iter(|| unsafe {
            let ptrs = (0..1000).map(|_| System.alloc(layout)).collect::<Vec<_>>();
            for ptr in black_box(ptrs) {
                System.dealloc(ptr, layout);
            }
        });
    });

    group.finish();
}

fn bench_typed(c: &mut Criterion) {
    let allocator = FreeListAllocator::system();
    let words = allocator.typed::<u64>();
    c.bench_function("typed/u64x4", |b| {
        b.iter(|| {
            let block = words.allocate(black_box(4)).unwrap();
            unsafe { words.deallocate(block, 4).unwrap() };
        });
    });
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_typed);
criterion_main!(benches);
