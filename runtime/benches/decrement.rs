//! Decrement path benchmarks on the in-memory shared store.
//!
//! Run with: `cargo bench -p flashsale-runtime`

#![allow(missing_docs)]
#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flashsale_core::keys::KeySpace;
use flashsale_core::types::{ProductId, UserId};
use flashsale_runtime::{LedgerConfig, StockLedger};
use flashsale_testing::{InMemorySharedStore, ManualClock};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

fn ledger() -> StockLedger {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemorySharedStore::with_clock(clock.clone()));
    StockLedger::new(store, KeySpace::default(), clock, LedgerConfig::default())
}

fn bench_decrement(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("decrement");
    group.throughput(Throughput::Elements(1));

    let ledger = ledger();
    runtime
        .block_on(ledger.init_stock(ProductId::new(1), 1 << 40))
        .expect("seed");
    let next_user = AtomicI64::new(0);
    group.bench_function("success", |b| {
        b.to_async(&runtime).iter(|| {
            let user = UserId::new(next_user.fetch_add(1, Ordering::Relaxed));
            let ledger = ledger.clone();
            async move {
                black_box(
                    ledger
                        .try_decrement(ProductId::new(1), user, 1)
                        .await
                        .expect("decrement"),
                )
            }
        });
    });

    let sold_out = self::ledger();
    runtime
        .block_on(sold_out.init_stock(ProductId::new(2), 0))
        .expect("seed");
    group.bench_function("sold_out", |b| {
        b.to_async(&runtime).iter(|| {
            let ledger = sold_out.clone();
            async move {
                black_box(
                    ledger
                        .try_decrement(ProductId::new(2), UserId::new(1), 1)
                        .await
                        .expect("decrement"),
                )
            }
        });
    });
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("contended_decrement");

    for tasks in [8_i64, 64, 512] {
        group.throughput(Throughput::Elements(u64::try_from(tasks).unwrap_or(0)));
        group.bench_with_input(BenchmarkId::from_parameter(tasks), &tasks, |b, &tasks| {
            b.to_async(&runtime).iter(|| async move {
                let ledger = ledger();
                ledger
                    .init_stock(ProductId::new(1), 100)
                    .await
                    .expect("seed");
                let handles: Vec<_> = (0..tasks)
                    .map(|user| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move {
                            ledger
                                .try_decrement(ProductId::new(1), UserId::new(user), 1)
                                .await
                        })
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.await.expect("join").expect("decrement"));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decrement, bench_contended);
criterion_main!(benches);
