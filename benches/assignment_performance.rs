//! Performance benchmarks for assignment scans and event dispatch

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use referral_exchange::amqp::publisher::MockNotifier;
use referral_exchange::metrics::MetricsCollector;
use referral_exchange::queue::QueueManager;
use referral_exchange::service::EventDispatcher;
use referral_exchange::store::{ExchangeState, InMemoryBackend, StateBackend};
use referral_exchange::types::InboundEvent;
use std::collections::HashSet;
use std::sync::Arc;

/// `size` waiting participants where `p0` has already referred every other
/// participant except the last one, so its scan walks the whole queue
fn populated_state(size: usize) -> ExchangeState {
    let backend = Arc::new(InMemoryBackend::new());
    let manager = QueueManager::new(backend.clone());

    for i in 0..size {
        manager
            .join_queue(&format!("p{}", i), &format!("https://bench.test/r/{}", i))
            .unwrap();
    }

    let mut state = backend.load().unwrap();
    for i in 1..size - 1 {
        state.history.record("p0", &format!("p{}", i));
    }
    state
}

fn manager_over(state: &ExchangeState) -> QueueManager {
    QueueManager::new(Arc::new(InMemoryBackend::with_state(state.clone())))
}

fn bench_next_assignment_worst_case(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_assignment_full_scan");

    for size in [100, 1_000] {
        let state = populated_state(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &state, |b, state| {
            b.iter_batched(
                || manager_over(state),
                |manager| black_box(manager.get_next_assignment().unwrap()),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_complete_referral(c: &mut Criterion) {
    // p0 holds an assignment to the last participant
    let backend = Arc::new(InMemoryBackend::with_state(populated_state(1_000)));
    QueueManager::new(backend.clone())
        .assign_referral("p0")
        .unwrap();
    let assigned = backend.load().unwrap();

    c.bench_function("complete_referral_1000", |b| {
        b.iter_batched(
            || manager_over(&assigned),
            |manager| black_box(manager.complete_referral("p0").unwrap()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_dispatch_join(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let metrics = Arc::new(MetricsCollector::new().unwrap());

    c.bench_function("dispatch_join_into_100", |b| {
        b.iter_batched(
            || {
                EventDispatcher::new(
                    Arc::new(manager_over(&populated_state(100))),
                    Arc::new(MockNotifier::new()),
                    HashSet::new(),
                    metrics.clone(),
                )
            },
            |dispatcher| {
                rt.block_on(async {
                    black_box(
                        dispatcher
                            .dispatch(InboundEvent::Join {
                                participant_id: "newcomer".to_string(),
                                referral_link: "https://bench.test/r/newcomer".to_string(),
                            })
                            .await
                            .unwrap(),
                    )
                })
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_stats(c: &mut Criterion) {
    let manager = manager_over(&populated_state(1_000));

    c.bench_function("stats_1000", |b| {
        b.iter(|| black_box(manager.stats().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_next_assignment_worst_case,
    bench_complete_referral,
    bench_dispatch_join,
    bench_stats
);
criterion_main!(benches);
