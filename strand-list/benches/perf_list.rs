//! Benchmarks for the keyed list's hot paths.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use strand_list::KeyedList;

fn bench_insert_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_insert_remove");

    group.bench_function("strand_list/u64", |b| {
        let list = KeyedList::new();
        b.iter(|| {
            let key = list.insert(black_box(42u64));
            black_box(list.remove(key).unwrap())
        });
    });

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    const RESIDENT: u64 = 1_000;

    let mut group = c.benchmark_group("list_iterate");
    group.throughput(Throughput::Elements(RESIDENT));

    group.bench_function("strand_list/1k", |b| {
        let list = KeyedList::new();
        for i in 0..RESIDENT {
            list.insert(i);
        }
        b.iter(|| {
            let mut sum = 0u64;
            list.iterate(|_, value| sum += *value).unwrap();
            black_box(sum)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert_remove, bench_iterate);
criterion_main!(benches);
