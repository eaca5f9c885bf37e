//! Benchmarks for threshold splitting, reconstruction and fragment sealing
//!
//! Payload sizes cover a short credential, a typical record and a document.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mirrorshard::fragment::{decrypt, encrypt, NodeKey};
use mirrorshard::sharing::{reconstruct, split};
use mirrorshard::{NodeId, RecordId};

const SIZES: [usize; 3] = [32, 4 * 1024, 64 * 1024];

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn benchmark_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_5_of_3");
    for size in SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| split(black_box(data), 5, 3).unwrap());
        });
    }
    group.finish();
}

fn benchmark_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct_3");
    for size in SIZES {
        let shares = split(&payload(size), 5, 3).unwrap();
        let subset = vec![shares[0].clone(), shares[2].clone(), shares[4].clone()];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &subset, |b, subset| {
            b.iter(|| reconstruct(black_box(subset), 3).unwrap());
        });
    }
    group.finish();
}

fn benchmark_wide_threshold(c: &mut Criterion) {
    let data = payload(4 * 1024);
    let shares = split(&data, 32, 16).unwrap();

    c.bench_function("split_32_of_16_4k", |b| {
        b.iter(|| split(black_box(&data), 32, 16).unwrap());
    });
    c.bench_function("reconstruct_16_of_32_4k", |b| {
        b.iter(|| reconstruct(black_box(&shares[..16]), 16).unwrap());
    });
}

fn benchmark_fragment_seal(c: &mut Criterion) {
    let record_id = RecordId::new("bench-record");
    let node_id = NodeId::new("bench-node");
    let key = NodeKey::generate().unwrap();
    let share = split(&payload(4 * 1024), 5, 3).unwrap().remove(0);
    let fragment = encrypt(&share, &record_id, &node_id, 0, &key).unwrap();

    c.bench_function("fragment_encrypt_4k", |b| {
        b.iter(|| encrypt(black_box(&share), &record_id, &node_id, 0, &key).unwrap());
    });
    c.bench_function("fragment_decrypt_4k", |b| {
        b.iter(|| decrypt(black_box(&fragment), &key).unwrap());
    });
}

criterion_group!(
    benches,
    benchmark_split,
    benchmark_reconstruct,
    benchmark_wide_threshold,
    benchmark_fragment_seal
);
criterion_main!(benches);
