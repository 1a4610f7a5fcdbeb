//! Performance benchmarks for policy-watcher.
//!
//! Covers the paths that sit between a policy change and the reload:
//! - Swapping the update callback while messages flow
//! - Publishing a notification
//! - Fan-out from one publisher to many listeners

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use policy_watcher::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const ENDPOINT: &str = "mem://bench";

fn bus() -> MemoryBus {
    let bus = MemoryBus::new();
    bus.bind(ENDPOINT);
    bus
}

/// Benchmark installing a new callback
fn benchmark_set_callback(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let bus = bus();
    let notifier = runtime
        .block_on(Notifier::connect(&bus, NotifierConfig::new(ENDPOINT)))
        .unwrap();

    let mut group = c.benchmark_group("set_callback");
    group.bench_function("replace", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let tag = counter;
            notifier.set_callback(move |msg| {
                black_box((tag, msg));
            });
        });
    });
    group.finish();

    runtime.block_on(notifier.close());
}

/// Benchmark notify with nobody else listening
fn benchmark_notify(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let bus = bus();
    let notifier = runtime
        .block_on(Notifier::connect(
            &bus,
            NotifierConfig::new(ENDPOINT)
                .with_subject("policy.out")
                .with_inbound_subject("policy.in"),
        ))
        .unwrap();

    let mut group = c.benchmark_group("notify");
    group.bench_function("empty_payload", |b| {
        b.iter(|| {
            runtime.block_on(async {
                notifier.notify().await.unwrap();
            });
        });
    });
    group.bench_function("small_payload", |b| {
        b.iter(|| {
            runtime.block_on(async {
                notifier.notify_with("p, alice, data1, read").await.unwrap();
            });
        });
    });
    group.finish();

    runtime.block_on(notifier.close());
}

/// Benchmark delivery to a varying number of listeners
fn benchmark_fan_out(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("fan_out");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for listeners in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(listeners as u64));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_listeners", listeners)),
            &listeners,
            |b, &listeners| {
                let bus = bus();
                let delivered = Arc::new(AtomicUsize::new(0));

                let (updater, peers) = runtime.block_on(async {
                    let updater = Notifier::connect(&bus, NotifierConfig::new(ENDPOINT))
                        .await
                        .unwrap();
                    let mut peers = Vec::with_capacity(listeners);
                    for _ in 0..listeners {
                        let peer = Notifier::connect(&bus, NotifierConfig::new(ENDPOINT))
                            .await
                            .unwrap();
                        let delivered = Arc::clone(&delivered);
                        peer.set_callback(move |_| {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        });
                        peers.push(peer);
                    }
                    (updater, peers)
                });

                b.iter_custom(|iters| {
                    runtime.block_on(async {
                        delivered.store(0, Ordering::Relaxed);
                        let target = iters as usize * listeners;

                        let start = Instant::now();
                        for _ in 0..iters {
                            updater.notify().await.unwrap();
                        }
                        while delivered.load(Ordering::Relaxed) < target {
                            tokio::task::yield_now().await;
                        }
                        start.elapsed()
                    })
                });

                runtime.block_on(async {
                    for peer in &peers {
                        peer.close().await;
                    }
                    updater.close().await;
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_set_callback,
    benchmark_notify,
    benchmark_fan_out,
);

criterion_main!(benches);
