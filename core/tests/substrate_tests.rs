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

//! Cross-component tests for the execution substrate

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use strandio_core::{
    AtomicState, Error, EventQueue, Executor, ExecutorPool, Lifecycle, OperationQueue, SelfRef,
    Shared, State, StrandBound, StrandCell,
};

const WAIT: Duration = Duration::from_secs(5);

/// Minimal connection-like object built from the substrate components
struct Widget {
    self_ref: SelfRef<Widget>,
    executor: Executor,
    state: AtomicState,
    queue: OperationQueue<Widget>,
    handlers_inside: AtomicBool,
    stops: AtomicUsize,
    dropped: Arc<AtomicBool>,
}

impl Widget {
    fn new(executor: Executor, dropped: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Widget>| Widget {
            self_ref: SelfRef::new(weak),
            queue: OperationQueue::new(&executor),
            executor,
            state: AtomicState::default(),
            handlers_inside: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
            dropped,
        })
    }

    /// Fails the test if two handlers of this object ever overlap
    fn exclusive(&self, f: impl FnOnce()) {
        assert!(self.executor.running_in_this_thread());
        assert!(!self.handlers_inside.swap(true, Ordering::SeqCst), "handlers overlapped");
        f();
        self.handlers_inside.store(false, Ordering::SeqCst);
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl Shared for Widget {
    fn self_ref(&self) -> &SelfRef<Self> {
        &self.self_ref
    }
}

impl StrandBound for Widget {
    fn executor(&self) -> &Executor {
        &self.executor
    }
}

impl EventQueue for Widget {
    fn event_queue(&self) -> &OperationQueue<Self> {
        &self.queue
    }
}

impl Lifecycle for Widget {
    fn state(&self) -> &AtomicState {
        &self.state
    }

    fn on_start(this: &Arc<Self>) {
        this.state.store(State::Started);
    }

    fn on_stop(this: &Arc<Self>, _interrupted: State, _error: Option<Error>) {
        this.stops.fetch_add(1, Ordering::SeqCst);
        this.queue.clear();
        this.state.store(State::Stopped);
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_strand_affinity_under_concurrent_posts() {
    let pool = ExecutorPool::new(4).unwrap();
    pool.run().unwrap();
    let widget = Widget::new(pool.acquire(), Arc::new(AtomicBool::new(false)));
    let counter = Arc::new(StrandCell::new(&widget.executor, 0usize));

    let posters: Vec<_> = (0..8)
        .map(|_| {
            let widget = widget.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    let inner = widget.clone();
                    let counter = counter.clone();
                    widget.executor.post(move || {
                        inner.exclusive(|| counter.with(|n| *n += 1));
                    });
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    let (tx, rx) = mpsc::channel();
    let reader = counter.clone();
    widget.executor.post(move || tx.send(reader.with(|n| *n)).unwrap());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2000);
    pool.stop().unwrap();
}

#[test]
fn test_queue_order_from_many_threads() {
    let pool = ExecutorPool::new(2).unwrap();
    pool.run().unwrap();
    let widget = Widget::new(pool.acquire(), Arc::new(AtomicBool::new(false)));
    let log = Arc::new(Mutex::new(Vec::new()));

    // Each push returns before the next thread pushes, so submission order is A, B, C
    for name in ["A", "B", "C"] {
        let widget = widget.clone();
        let log = log.clone();
        thread::spawn(move || {
            widget
                .push_event(move |slot| {
                    let owner = slot.owner().clone();
                    // Complete asynchronously to stress the in-flight guarantee
                    owner.executor.post_after(Duration::from_millis(20), move || {
                        log.lock().unwrap().push(name);
                        drop(slot);
                    });
                })
                .unwrap();
        })
        .join()
        .unwrap();
    }

    let (tx, rx) = mpsc::channel();
    widget.push_event(move |_slot| tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
    pool.stop().unwrap();
}

#[test]
fn test_at_most_one_in_flight() {
    let pool = ExecutorPool::new(2).unwrap();
    pool.run().unwrap();
    let widget = Widget::new(pool.acquire(), Arc::new(AtomicBool::new(false)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for i in 0..50u64 {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        widget
            .push_event(move |slot| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                let owner = slot.owner().clone();
                owner.executor.post_after(Duration::from_micros(i % 3 * 100), move || {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    slot.complete();
                });
            })
            .unwrap();
    }

    let (tx, rx) = mpsc::channel();
    widget.push_event(move |_slot| tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    pool.stop().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let pool = ExecutorPool::new(1).unwrap();
    pool.run().unwrap();
    let widget = Widget::new(pool.acquire(), Arc::new(AtomicBool::new(false)));

    widget.begin_start().unwrap();
    assert!(wait_until(|| widget.is_started()));

    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let widget = widget.clone();
            thread::spawn(move || widget.begin_stop(None))
        })
        .collect();
    for stopper in stoppers {
        stopper.join().unwrap();
    }

    assert!(wait_until(|| widget.state().load() == State::Stopped));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(widget.stops.load(Ordering::SeqCst), 1);
    pool.stop().unwrap();
}

#[test]
fn test_pending_operation_keeps_object_alive() {
    let pool = ExecutorPool::new(1).unwrap();
    pool.run().unwrap();
    let dropped = Arc::new(AtomicBool::new(false));
    let widget = Widget::new(pool.acquire(), dropped.clone());

    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(Some(release_rx)));
    widget
        .push_event(move |slot| {
            let owner = slot.owner().clone();
            let rx = release_rx.lock().unwrap().take().unwrap();
            // The slot rides along with the async wait and keeps its owner alive
            owner.executor.spawn_then(
                async move {
                    tokio::task::spawn_blocking(move || rx.recv()).await.ok();
                },
                move |()| drop(slot),
            );
        })
        .unwrap();

    drop(widget);
    thread::sleep(Duration::from_millis(100));
    assert!(!dropped.load(Ordering::SeqCst), "destroyed while an operation was pending");

    release_tx.send(()).unwrap();
    assert!(wait_until(|| dropped.load(Ordering::SeqCst)));
    pool.stop().unwrap();
}

#[test]
#[cfg_attr(feature = "strict-asserts", ignore = "contract violations panic")]
fn test_unshared_object_cannot_start() {
    let pool = ExecutorPool::new(1).unwrap();
    let executor = pool.acquire();
    let widget = Widget {
        self_ref: SelfRef::detached(),
        queue: OperationQueue::new(&executor),
        executor,
        state: AtomicState::default(),
        handlers_inside: AtomicBool::new(false),
        stops: AtomicUsize::new(0),
        dropped: Arc::new(AtomicBool::new(false)),
    };
    assert!(matches!(widget.begin_start(), Err(Error::NotShareable)));
    assert!(matches!(widget.push_event(|_| {}), Err(Error::NotShareable)));
    assert_eq!(widget.state().load(), State::Constructed);
}

#[test]
fn test_pool_round_robin_spreads_objects() {
    let pool = ExecutorPool::new(3).unwrap();
    let indices: Vec<usize> = (0..7).map(|_| pool.acquire().index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0]);
}
