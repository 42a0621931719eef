//! Benchmarks for segkv storage operations

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use segkv::entry::{decode, encode, Entry};
use segkv::{Config, Database};
use tempfile::tempdir;

const N_KEYS: usize = 1_000;
const VALUE_SIZE: usize = 100;

fn open_db(dir: &std::path::Path, segment_size_bound: u64) -> Database {
    let config = Config::builder()
        .data_dir(dir)
        .segment_size_bound(segment_size_bound)
        .merge_threshold(usize::MAX)
        .build();
    Database::open_with_config(config).unwrap()
}

fn codec_benchmark(c: &mut Criterion) {
    let entry = Entry::put(b"benchmark-key".to_vec(), vec![b'x'; VALUE_SIZE]);
    let bytes = encode(&entry).unwrap();

    c.bench_function("entry_encode", |b| b.iter(|| encode(&entry).unwrap()));
    c.bench_function("entry_decode", |b| b.iter(|| decode(&bytes).unwrap()));
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("db_put_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = open_db(dir.path(), 64 * 1024);
                (dir, db)
            },
            |(_dir, db)| {
                for i in 0..N_KEYS {
                    db.put(format!("key{}", i).as_bytes(), &[b'x'; VALUE_SIZE])
                        .unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn get_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path(), 16 * 1024);
    for i in 0..N_KEYS {
        db.put(format!("key{}", i).as_bytes(), &[b'x'; VALUE_SIZE])
            .unwrap();
    }

    c.bench_function("db_get_hit_1k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let v = db.get(format!("key{}", i).as_bytes()).unwrap();
                assert!(v.is_some());
            }
        })
    });

    c.bench_function("db_get_miss_1k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let v = db.get(format!("missing{}", i).as_bytes()).unwrap();
                assert!(v.is_none());
            }
        })
    });

    db.close().unwrap();
}

fn compact_benchmark(c: &mut Criterion) {
    c.bench_function("db_compact_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = open_db(dir.path(), 8 * 1024);
                for i in 0..N_KEYS {
                    db.put(format!("key{}", i % 100).as_bytes(), &[b'x'; VALUE_SIZE])
                        .unwrap();
                }
                (dir, db)
            },
            |(_dir, db)| {
                while db.segment_count() > 2 && db.compact().unwrap() {}
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    codec_benchmark,
    put_benchmark,
    get_benchmark,
    compact_benchmark
);
criterion_main!(benches);
