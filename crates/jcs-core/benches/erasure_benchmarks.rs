//! Benchmarks for the streaming erasure codec

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jcs_core::erasure::StreamCodec;
use std::path::PathBuf;

fn write_input(dir: &tempfile::TempDir, size: usize) -> PathBuf {
    let path = dir.path().join("input");
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();
    path
}

fn shard_paths(dir: &tempfile::TempDir, count: usize) -> Vec<PathBuf> {
    (0..count).map(|i| dir.path().join(format!("shard.{}", i))).collect()
}

fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("erasure_split");

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024].iter() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, *size);
        let codec = StreamCodec::new(4, 2).unwrap();
        let shards = shard_paths(&dir, 6);

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(codec.split(&input, &shards).unwrap()));
        });
    }

    group.finish();
}

fn bench_join_degraded(c: &mut Criterion) {
    let mut group = c.benchmark_group("erasure_join_degraded");

    for size in [1024 * 1024, 8 * 1024 * 1024].iter() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, *size);
        let codec = StreamCodec::new(4, 2).unwrap();
        let shards = shard_paths(&dir, 6);
        codec.split(&input, &shards).unwrap();

        // lose two data shards
        let available: Vec<Option<PathBuf>> = shards
            .iter()
            .enumerate()
            .map(|(i, p)| if i < 2 { None } else { Some(p.clone()) })
            .collect();
        let output = dir.path().join("output");

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| codec.join(&available, &output, size as u64).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_split, bench_join_degraded);
criterion_main!(benches);
