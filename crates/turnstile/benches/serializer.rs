// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Benchmarks the cost of serializing calls:
//!
//! 1. **Direct:** the unwrapped operation, no serialization at all.
//! 2. **Mutex:** a `tokio::sync::Mutex` around the shared state, the hand-rolled alternative.
//! 3. **Turnstile:** the same operation wrapped in an operation set, with all handles
//!    admitted before any is awaited (the queue is `n` deep).
//! 4. **Turnstile (one at a time):** each call is awaited before the next one is made.

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use turnstile::{Operation, OperationSet, unwrap};

fn counter_op(counter: &Arc<AtomicU64>) -> Operation<u64, u64> {
    let counter = Arc::clone(counter);
    Operation::from_fn(move |n: u64| counter.fetch_add(n, Ordering::Relaxed))
}

fn bench_serialized_calls(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let counter = Arc::new(AtomicU64::new(0));
    let set = OperationSet::builder()
        .name("bench")
        .runtime_handle(runtime.handle().clone())
        .operation(counter_op(&counter))
        .build()
        .unwrap();
    let wrapped = set.operations()[0].clone();
    let direct = unwrap(&wrapped);
    let mutex = Arc::new(tokio::sync::Mutex::new(0_u64));

    let mut group = c.benchmark_group("turnstile/calls");
    for &n in &[1_u64, 64, 1024] {
        group.bench_with_input(BenchmarkId::new("direct", n), &n, |b, &n| {
            b.to_async(&runtime).iter(|| async {
                for i in 0..n {
                    black_box(direct.call(i).await);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("mutex", n), &n, |b, &n| {
            b.to_async(&runtime).iter(|| async {
                for i in 0..n {
                    let mut guard = mutex.lock().await;
                    *guard += i;
                    black_box(*guard);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("queued", n), &n, |b, &n| {
            b.to_async(&runtime).iter(|| async {
                let handles: Vec<_> = (0..n).map(|i| wrapped.call(i)).collect();
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("one_at_a_time", n), &n, |b, &n| {
            b.to_async(&runtime).iter(|| async {
                for i in 0..n {
                    black_box(wrapped.call(i).await.unwrap());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_serialized_calls
);
criterion_main!(benches);
