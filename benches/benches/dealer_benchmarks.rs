use std::{hint::black_box, sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use routex::{Dealer, InMemoryStorage, RegisterOptions};

fn dealer_with(executors: usize) -> Dealer {
    let dealer = Dealer::new(
        "bench",
        Arc::new(InMemoryStorage::new()),
        Duration::from_secs(5),
        Duration::from_secs(60),
        1,
    );
    for i in 0..executors {
        dealer
            .register(
                "net.example.work",
                &format!("peer{i}"),
                RegisterOptions::default(),
            )
            .unwrap();
    }
    dealer
}

fn bench_match_registrations(c: &mut Criterion) {
    let mut group = c.benchmark_group("dealer_match_registrations");
    for executors in [1, 8, 64] {
        let dealer = dealer_with(executors);
        group.bench_with_input(
            BenchmarkId::from_parameter(executors),
            &executors,
            |b, _| b.iter(|| black_box(dealer.match_registrations(black_box("net.example.work")))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_match_registrations);
criterion_main!(benches);
