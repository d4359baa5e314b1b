use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use routex::{InMemoryStorage, SubscribeOptions, Subscription, Urim};

const FANOUT: [usize; 3] = [10, 100, 1000];

/// Индекс с `n` литеральными подписками и парой шаблонов на каждый узел.
fn populated(n: usize) -> Urim<SubscribeOptions> {
    let urim = Urim::new(Arc::new(InMemoryStorage::new()), "subscriptions");
    for i in 0..n {
        let author = format!("peer{}", i % 16);
        for uri in [
            format!("net.node{i}.status"),
            format!("net.*.disk{}", i % 8),
            format!("net.node{i}.**"),
        ] {
            urim.add(Subscription::new(uri, &author, SubscribeOptions::default()))
                .unwrap();
        }
    }
    urim
}

fn bench_match_literal(c: &mut Criterion) {
    let mut group = c.benchmark_group("urim_match_literal");
    for n in FANOUT {
        let urim = populated(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(urim.match_uri(black_box("net.node7.status"))))
        });
    }
    group.finish();
}

fn bench_match_wildcards(c: &mut Criterion) {
    let mut group = c.benchmark_group("urim_match_wildcards");
    for n in FANOUT {
        let urim = populated(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(urim.match_uri(black_box("net.node3.disk3"))))
        });
    }
    group.finish();
}

fn bench_add_delete(c: &mut Criterion) {
    let urim = populated(100);
    c.bench_function("urim_add_delete", |b| {
        b.iter(|| {
            urim.add(Subscription::new(
                "net.bench.topic",
                "bench",
                SubscribeOptions::default(),
            ))
            .unwrap();
            black_box(urim.delete_by_author("bench", None).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_match_literal,
    bench_match_wildcards,
    bench_add_delete
);
criterion_main!(benches);
