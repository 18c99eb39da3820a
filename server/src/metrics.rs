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

//! Lock-free server metrics

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// Every counter is an atomic and is also forwarded to the `metrics` facade.
/// Use [`snapshot`](Self::snapshot) for a point-in-time view.
#[derive(Debug)]
pub struct ServerMetrics {
    // Sessions
    sessions_accepted: AtomicU64,
    sessions_active: AtomicU64,
    sessions_rejected: AtomicU64,

    // Throughput
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    writes: AtomicU64,
    reads: AtomicU64,

    // Errors
    accept_errors: AtomicU64,
    handshake_failures: AtomicU64,
    timeouts: AtomicU64,

    total_session_duration_ns: AtomicU64,
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            sessions_accepted: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            total_session_duration_ns: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    // Session tracking

    pub fn session_opened(&self) {
        self.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        counter!("strandio.sessions.total").increment(1);
        gauge!("strandio.sessions.active").increment(1.0);
    }

    pub fn session_closed(&self, lifetime: Duration) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
        self.total_session_duration_ns
            .fetch_add(u64::try_from(lifetime.as_nanos()).unwrap_or(u64::MAX), Ordering::Relaxed);
        gauge!("strandio.sessions.active").decrement(1.0);
    }

    /// Record a connection dropped because the session limit was reached
    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("strandio.sessions.rejected").increment(1);
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions_active.load(Ordering::Relaxed)
    }

    pub fn total_sessions(&self) -> u64 {
        self.sessions_accepted.load(Ordering::Relaxed)
    }

    // Throughput tracking

    pub fn write_completed(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn read_completed(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Error tracking

    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        counter!("strandio.errors.accept").increment(1);
    }

    pub fn handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        counter!("strandio.errors.handshake").increment(1);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        counter!("strandio.errors.timeout").increment(1);
    }

    /// Get a snapshot of all metrics
    ///
    /// Counters are read individually, so a snapshot taken under load may be
    /// off by in-flight updates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            avg_session_duration: self.average_session_duration(),
        }
    }

    fn average_session_duration(&self) -> Duration {
        let closed = self.total_sessions() - self.active_sessions().min(self.total_sessions());
        if closed == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_session_duration_ns.load(Ordering::Relaxed) / closed)
    }
}

/// Server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub sessions_accepted: u64,
    pub sessions_active: u64,
    pub sessions_rejected: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub writes: u64,
    pub reads: u64,
    pub accept_errors: u64,
    pub handshake_failures: u64,
    pub timeouts: u64,
    pub uptime: Duration,
    /// Average lifetime of sessions that have closed
    pub avg_session_duration: Duration,
}

impl MetricsSnapshot {
    fn per_sec(&self, value: u64) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        value as f64 / self.uptime.as_secs_f64()
    }

    pub fn bytes_sent_per_sec(&self) -> f64 {
        self.per_sec(self.bytes_sent)
    }

    pub fn bytes_received_per_sec(&self) -> f64 {
        self.per_sec(self.bytes_received)
    }

    pub fn total_errors(&self) -> u64 {
        self.accept_errors + self.handshake_failures + self.timeouts
    }

    pub fn error_rate(&self) -> f64 {
        self.per_sec(self.total_errors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_session_tracking() {
        let metrics = ServerMetrics::new();
        assert_eq!(metrics.active_sessions(), 0);

        metrics.session_opened();
        metrics.session_opened();
        assert_eq!(metrics.active_sessions(), 2);

        metrics.session_closed(Duration::from_secs(10));
        assert_eq!(metrics.active_sessions(), 1);
        assert_eq!(metrics.total_sessions(), 2);
        assert_eq!(metrics.snapshot().avg_session_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_throughput_and_errors() {
        let metrics = ServerMetrics::new();
        metrics.write_completed(100);
        metrics.read_completed(200);
        metrics.read_completed(50);
        metrics.accept_error();
        metrics.timeout();
        metrics.session_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.bytes_received, 250);
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.sessions_rejected, 1);
        assert_eq!(snapshot.total_errors(), 2);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(ServerMetrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.session_opened();
                        metrics.write_completed(10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.total_sessions(), 1000);
        assert_eq!(metrics.snapshot().bytes_sent, 10_000);
    }
}
