use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use storage_quota_hub::bench_support::storage_quota_ledger::StrategyKind;
use storage_quota_hub::bench_support::LedgerBenchFixture;

fn bench_reserve_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release");
    group
        .sample_size(200)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2));

    for kind in [StrategyKind::Pessimistic, StrategyKind::Optimistic] {
        let fixture = LedgerBenchFixture::new(kind).expect("bench fixture");
        let mut conn = fixture.connection().expect("bench connection");
        group.bench_function(BenchmarkId::new("strategy", kind.to_string()), |b| {
            b.iter(|| {
                fixture
                    .reserve_release(&mut conn, black_box(4_096))
                    .expect("reserve and release");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reserve_release);
criterion_main!(benches);
