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

//! Client and server benchmarks over loopback

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use strandio_client::{ClientConfig, TcpClient};
use strandio_core::Observer;
use strandio_server::{ServerConfig, TcpServer, TcpSession};

// ============================================================================
// Fixtures
// ============================================================================

struct Echo {
    server: Arc<TcpServer>,
    client: Arc<TcpClient>,
    received: Arc<AtomicUsize>,
}

impl Echo {
    fn start(pool_size: usize) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::WARN)
            .try_init();
        let server = TcpServer::new(ServerConfig::default().with_pool_size(pool_size)).unwrap();
        server.bind(Observer::recv(|session: &Arc<TcpSession>, data| {
            let _ = session.send(data.to_vec());
        }));
        server.start().unwrap();

        let addr = server.local_addr().unwrap();
        let client = TcpClient::new(ClientConfig::new(addr.ip().to_string(), addr.port())).unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        client.bind(Observer::recv(move |_, data| {
            counter.fetch_add(data.len(), Ordering::Release);
        }));
        client.start().unwrap();
        Self {
            server,
            client,
            received,
        }
    }

    /// Send `payload` `count` times and spin until every echoed byte is back
    fn roundtrip(&self, payload: &[u8], count: usize) {
        let target = self.received.load(Ordering::Acquire) + payload.len() * count;
        for _ in 0..count {
            self.client.send(payload.to_vec()).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.received.load(Ordering::Acquire) < target {
            assert!(Instant::now() < deadline, "echo stalled");
            std::thread::yield_now();
        }
    }

    fn stop(self) {
        self.client.stop().unwrap();
        self.server.stop().unwrap();
    }
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_echo_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("echo_throughput");
    group.measurement_time(Duration::from_secs(5));
    let echo = Echo::start(2);

    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![0x5a; size];
        group.throughput(Throughput::Bytes((size * 100) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| echo.roundtrip(black_box(payload), 100));
        });
    }

    group.finish();
    echo.stop();
}

fn bench_connect_disconnect(c: &mut Criterion) {
    let server = TcpServer::new(ServerConfig::default().with_pool_size(2)).unwrap();
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    c.bench_function("connect_disconnect", |b| {
        b.iter(|| {
            let client =
                TcpClient::new(ClientConfig::new(addr.ip().to_string(), addr.port())).unwrap();
            client.start().unwrap();
            client.stop().unwrap();
        });
    });

    server.stop().unwrap();
}

fn bench_pool_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_size");
    let payload = vec![0x5a; 512];

    for pool_size in [1usize, 4] {
        let echo = Echo::start(pool_size);
        group.bench_with_input(
            BenchmarkId::from_parameter(pool_size),
            &pool_size,
            |b, _| b.iter(|| echo.roundtrip(&payload, 50)),
        );
        echo.stop();
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_echo_throughput,
    bench_connect_disconnect,
    bench_pool_sizes
);
criterion_main!(benches);
