//! Dictionary benchmarks.
//!
//! Measures the incremental hash table under insert and lookup workloads,
//! including the steady trickle of migration work that rehashing adds to
//! every operation.

use bytes::Bytes;
use cinder::storage::dict::Dict;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// Benchmark insert-heavy workloads (every insert may pay a rehash step)
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("dict_insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_distinct", |b| {
        let mut dict: Dict<Bytes, Bytes> = Dict::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{i}"));
            dict.set(key, Bytes::from_static(b"value"));
            i += 1;
        });
    });

    group.bench_function("set_overwrite", |b| {
        let mut dict: Dict<Bytes, Bytes> = Dict::new();
        for i in 0..1024u64 {
            dict.set(Bytes::from(format!("key:{i}")), Bytes::from_static(b"value"));
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i % 1024));
            dict.set(key, Bytes::from_static(b"fresh"));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark lookups against a populated table
fn bench_lookup(c: &mut Criterion) {
    let mut dict: Dict<Bytes, Bytes> = Dict::new();
    for i in 0..100_000u64 {
        dict.set(
            Bytes::from(format!("key:{i}")),
            Bytes::from(format!("value:{i}")),
        );
    }

    let mut group = c.benchmark_group("dict_lookup");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i % 100_000));
            black_box(dict.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("missing:{i}"));
            black_box(dict.get(&key));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
