//! Micro-benchmarks for the meet operator over the type lattice.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use relift::prelude::*;

fn sample_types() -> Vec<Type> {
    vec![
        Type::Void,
        Type::int(32),
        Type::signed_int(32),
        Type::unsigned_int(16),
        Type::float(64),
        Type::Boolean,
        Type::Char,
        Type::pointer(Type::Char),
        Type::pointer(Type::pointer(Type::int(32))),
        Type::array(Type::int(32), 64),
        Type::size(32),
    ]
}

fn bench_meet_pairs(c: &mut Criterion) {
    let samples = sample_types();
    c.bench_function("meet_all_pairs", |b| {
        b.iter(|| {
            let mut ch = false;
            for x in &samples {
                for y in &samples {
                    black_box(x.meet_with(black_box(y), &mut ch, false));
                }
            }
            ch
        })
    });
}

fn bench_union_growth(c: &mut Criterion) {
    let samples = sample_types();
    c.bench_function("meet_union_growth", |b| {
        b.iter(|| {
            let mut ch = false;
            let mut acc = Type::float(64);
            for x in &samples {
                acc = acc.meet_with(black_box(x), &mut ch, false);
            }
            acc
        })
    });
}

fn bench_compatibility(c: &mut Criterion) {
    let samples = sample_types();
    c.bench_function("is_compatible_with", |b| {
        b.iter(|| {
            let mut n = 0u32;
            for x in &samples {
                for y in &samples {
                    if x.is_compatible_with(black_box(y)) {
                        n += 1;
                    }
                }
            }
            n
        })
    });
}

criterion_group!(benches, bench_meet_pairs, bench_union_growth, bench_compatibility);
criterion_main!(benches);
