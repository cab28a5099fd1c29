use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use vellum_kv::{Iter as _, IterOptions, MemoryStore, Read as _, Txn as _, TxnStore as _, Write as _};

fn point_ops(c: &mut Criterion) {
    let store = MemoryStore::new();
    let mut n = 0u64;
    c.bench_function("set", |b| {
        b.iter(|| {
            store.set(black_box(&n.to_be_bytes()), b"value").unwrap();
            n += 1;
        })
    });

    let store = MemoryStore::new();
    for i in 0..10_000u64 {
        store.set(&i.to_be_bytes(), b"value").unwrap();
    }
    c.bench_function("get", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&(i % 10_000).to_be_bytes()).unwrap());
            i += 1;
        })
    });
}

fn scans(c: &mut Criterion) {
    let store = MemoryStore::new();
    for i in 0..10_000u64 {
        store.set(&i.to_be_bytes(), b"value").unwrap();
    }
    c.bench_function("scan_10k", |b| {
        b.iter(|| {
            let mut iter = store.iterator(IterOptions::default());
            let mut count = 0usize;
            while iter.next().unwrap() {
                black_box(iter.key());
                count += 1;
            }
            assert_eq!(count, 10_000);
        })
    });
}

fn commits(c: &mut Criterion) {
    let store = MemoryStore::new();
    let mut n = 0u64;
    c.bench_function("txn_commit_10", |b| {
        b.iter(|| {
            let txn = store.new_txn(false).unwrap();
            for _ in 0..10 {
                txn.set(&n.to_be_bytes(), b"value").unwrap();
                n += 1;
            }
            txn.commit().unwrap();
        })
    });
}

criterion_group!(benches, point_ops, scans, commits);
criterion_main!(benches);
