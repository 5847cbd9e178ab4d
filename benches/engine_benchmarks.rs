//! Engine Performance Benchmarks
//!
//! Measures story insertion/commit throughput and garbage-collection
//! throughput. The engine is single-threaded-cooperative, so these are
//! all single-threaded benchmarks, unlike the multi-threaded transaction
//! benchmarks a full database driver would run.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use storyline::{FieldValue, HashIndex, Index, IndexDef, Isolation, MvccConfig, StmtMode, Storyline, Tuple};

fn fresh_db() -> (Storyline, storyline::SpaceId) {
    let mut db = Storyline::new(MvccConfig::default());
    let space = storyline::SpaceId::new(1);
    db.register_space(space, vec![Box::new(HashIndex::new(IndexDef::single(0))) as Box<dyn Index>]);
    (db, space)
}

/// Benchmark: single-statement insert transactions, immediately committed.
fn bench_insert_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_commit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert_prepare_commit", |b| {
        let (mut db, space) = fresh_db();
        let mut i: i64 = 0;
        b.iter(|| {
            let txn = db.begin(Isolation::ReadCommitted);
            let tuple = Tuple::new([FieldValue::Int(i)]);
            let stmt = db.insert(txn, space, tuple, StmtMode::Insert).unwrap();
            db.prepare(stmt).unwrap();
            db.commit(stmt);
            black_box(i);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark: read-only transactions against an already-populated space.
fn bench_read_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_only");
    group.throughput(Throughput::Elements(1));

    let (mut db, space) = fresh_db();
    for i in 0..1000i64 {
        let txn = db.begin(Isolation::ReadCommitted);
        let tuple = Tuple::new([FieldValue::Int(i)]);
        let stmt = db.insert(txn, space, tuple, StmtMode::Insert).unwrap();
        db.prepare(stmt).unwrap();
        db.commit(stmt);
    }

    group.bench_function("clarify_committed_tuple", |b| {
        let key = storyline::Key::new([FieldValue::Int(500)]);
        b.iter(|| {
            let reader = db.begin(Isolation::ReadCommitted);
            let out = db.read(Some(reader), space, 0, &key);
            black_box(out);
        });
    });

    group.finish();
}

/// Benchmark: garbage-collection throughput as a function of backlog
/// size.
fn bench_gc_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_step");

    for backlog in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(backlog as u64));
        group.bench_with_input(BenchmarkId::new("backlog", backlog), &backlog, |b, &backlog| {
            b.iter_custom(|iters| {
                let mut total = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let (mut db, space) = fresh_db();
                    for i in 0..backlog as i64 {
                        let txn = db.begin(Isolation::ReadCommitted);
                        let tuple = Tuple::new([FieldValue::Int(i)]);
                        let stmt = db.insert(txn, space, tuple, StmtMode::Insert).unwrap();
                        db.prepare(stmt).unwrap();
                        db.commit(stmt);
                    }
                    let start = std::time::Instant::now();
                    db.gc_step(backlog);
                    total += start.elapsed();
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert_commit, bench_read_only, bench_gc_step);
criterion_main!(benches);
