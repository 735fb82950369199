#![allow(unused)]
extern crate clrhost;

use clrhost::{
    marshal::{marshal_arguments, marshal_bytes},
    native::{Allocator, HeapAllocator},
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::{hint::black_box, sync::Arc};

/// Copying image buffers into native byte arrays of typical assembly sizes
fn bench_marshal_bytes(c: &mut Criterion) {
    let allocator: Arc<dyn Allocator> = Arc::new(HeapAllocator::new());

    let mut group = c.benchmark_group("marshal_bytes");
    for size in [16 * 1024, 512 * 1024, 4 * 1024 * 1024] {
        let data = vec![0xA5_u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(marshal_bytes(&allocator, black_box(data)).unwrap()));
        });
    }
    group.finish();
}

/// Packing argument lists into the nested variant/string arrays
fn bench_marshal_arguments(c: &mut Criterion) {
    let allocator: Arc<dyn Allocator> = Arc::new(HeapAllocator::new());
    let args: Vec<String> = (0..32).map(|i| format!("--option-{i}=value")).collect();

    c.bench_function("marshal_arguments_32", |b| {
        b.iter(|| black_box(marshal_arguments(&allocator, black_box(args.as_slice())).unwrap()));
    });
}

criterion_group!(benches, bench_marshal_bytes, bench_marshal_arguments);
criterion_main!(benches);
