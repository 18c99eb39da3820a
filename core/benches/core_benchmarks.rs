//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Benchmarks for strand dispatch and the operation queue

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use strandio_core::{
    ConnectionConfig, EventQueue, Executor, ExecutorPool, OperationQueue, SelfRef, Shared,
    StrandBound,
};

struct Bench {
    self_ref: SelfRef<Bench>,
    executor: Executor,
    queue: OperationQueue<Bench>,
}

impl Shared for Bench {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.self_ref
    }
}

impl StrandBound for Bench {
    fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl EventQueue for Bench {
    fn event_queue(&self) -> &OperationQueue<Self> {
        &self.queue
    }
}

fn running_pool(size: usize) -> ExecutorPool {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
    let pool = ExecutorPool::new(size).expect("pool");
    pool.run().expect("run");
    pool
}

fn bench_config(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");

    group.bench_function("connection_config_builder", |b| {
        b.iter(|| {
            black_box(
                ConnectionConfig::default()
                    .with_connect_timeout(Duration::from_secs(2))
                    .with_read_buffer_size(4096),
            )
        })
    });

    group.finish();
}

fn bench_strand_post(c: &mut Criterion) {
    let pool = running_pool(1);
    let executor = pool.acquire();
    let mut group = c.benchmark_group("strand_post");

    for batch in [1usize, 64, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for _ in 1..batch {
                    executor.post(|| {});
                }
                executor.post(move || tx.send(()).expect("send"));
                rx.recv().expect("recv");
            })
        });
    }

    group.finish();
    pool.stop().expect("stop");
}

fn bench_operation_queue(c: &mut Criterion) {
    let pool = running_pool(1);
    let executor = pool.acquire();
    let bench = Arc::new_cyclic(|weak| Bench {
        self_ref: SelfRef::new(weak),
        queue: OperationQueue::new(&executor),
        executor,
    });
    let mut group = c.benchmark_group("operation_queue");

    for batch in [1usize, 64, 1024] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("inline_complete", batch), &batch, |b, &batch| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for _ in 1..batch {
                    bench.push_event(|slot| slot.complete()).expect("push");
                }
                bench.push_event(move |_slot| tx.send(()).expect("send")).expect("push");
                rx.recv().expect("recv");
            })
        });
    }

    group.finish();
    pool.stop().expect("stop");
}

criterion_group!(benches, bench_config, bench_strand_post, bench_operation_queue);
criterion_main!(benches);
