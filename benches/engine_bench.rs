//! Benchmarks for the copy-on-write B+Tree.
//!
//! - put: pending inserts, sequential and shuffled
//! - commit: persisting a batch of dirty nodes
//! - get: point reads from the committed tree and from an old snapshot

use std::hint::black_box;
use std::sync::Arc;

use cow_btree_engine::iterator::StorageIterator;
use cow_btree_engine::{BTree, FileStorage, MemoryStorage, Options};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tempfile::tempdir;

fn key(i: usize) -> String {
    format!("key{i:08}")
}

fn memory_tree() -> BTree<MemoryStorage> {
    let options = Options::default();
    let storage = Arc::new(MemoryStorage::new(&options).unwrap());
    BTree::open(storage, &options).unwrap()
}

fn filled_tree(count: usize) -> BTree<MemoryStorage> {
    let mut tree = memory_tree();
    for i in 0..count {
        tree.put(key(i).as_bytes(), b"value").unwrap();
    }
    tree.commit_at(1).unwrap();
    tree
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_put");

    for count in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter_with_setup(memory_tree, |mut tree| {
                for i in 0..count {
                    tree.put(key(i).as_bytes(), b"value").unwrap();
                }
                tree
            });
        });

        group.bench_with_input(BenchmarkId::new("shuffled", count), &count, |b, &count| {
            let mut order: Vec<usize> = (0..count).collect();
            order.shuffle(&mut StdRng::seed_from_u64(42));
            b.iter_with_setup(memory_tree, |mut tree| {
                for i in &order {
                    tree.put(key(*i).as_bytes(), b"value").unwrap();
                }
                tree
            });
        });
    }

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_commit");

    for batch in [100usize, 1_000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("memory", batch), &batch, |b, &batch| {
            b.iter_with_setup(
                || {
                    let mut tree = filled_tree(10_000);
                    for i in 0..batch {
                        tree.put(key(i * 7).as_bytes(), b"updated").unwrap();
                    }
                    tree
                },
                |mut tree| {
                    tree.commit_at(2).unwrap();
                    tree
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("file", batch), &batch, |b, &batch| {
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let options = Options::default();
                    let storage = Arc::new(FileStorage::open(dir.path(), &options).unwrap());
                    let mut tree = BTree::open(storage, &options).unwrap();
                    for i in 0..batch {
                        tree.put(key(i).as_bytes(), b"value").unwrap();
                    }
                    (dir, tree)
                },
                |(dir, mut tree)| {
                    tree.commit_at(1).unwrap();
                    (dir, tree)
                },
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_get");
    let count = 10_000;
    let mut tree = filled_tree(count);
    let old = tree.snapshot();
    for i in 0..count / 2 {
        tree.put(key(i).as_bytes(), b"newer").unwrap();
    }
    tree.commit_at(2).unwrap();

    group.bench_function("current", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 7919) % count;
            black_box(tree.get(key(i).as_bytes()).unwrap())
        });
    });

    group.bench_function("old_snapshot", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 7919) % count;
            black_box(old.get(key(i).as_bytes()).unwrap())
        });
    });

    group.bench_function("scan", |b| {
        b.iter(|| {
            let snap = tree.snapshot();
            let mut iter = snap.iter().unwrap();
            let mut n = 0usize;
            while iter.is_valid() {
                n += iter.value().len();
                iter.next().unwrap();
            }
            black_box(n)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_commit, bench_get);
criterion_main!(benches);
