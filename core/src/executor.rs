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

//! Executor and strand implementation
//!
//! An [`Executor`] pairs one event-loop context with a strand. The strand is a
//! FIFO of handlers drained by a single task on that context, so handlers
//! posted to it never run concurrently with each other. Every connection bound
//! to the executor submits its work through the strand; async I/O runs as
//! ordinary tasks on the same context and delivers its completion back onto
//! the strand.

use crate::Shared;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, trace, warn};

/// A handler queued on a strand
type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_STRAND_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_STRAND: Cell<Option<u64>> = const { Cell::new(None) };
    static CURRENT_CONTEXT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Identifier of the strand the calling thread is executing, if any
pub(crate) fn current_strand() -> Option<u64> {
    CURRENT_STRAND.with(Cell::get)
}

/// Identifier of the event-loop context the calling thread is driving, if any
pub(crate) fn current_context() -> Option<u64> {
    CURRENT_CONTEXT.with(Cell::get)
}

/// Marks the calling thread as executing a strand until dropped
struct StrandGuard {
    previous: Option<u64>,
}

impl StrandGuard {
    fn enter(strand_id: u64) -> Self {
        let previous = CURRENT_STRAND.with(|current| current.replace(Some(strand_id)));
        Self { previous }
    }
}

impl Drop for StrandGuard {
    fn drop(&mut self) {
        CURRENT_STRAND.with(|current| current.set(self.previous));
    }
}

/// Marks the calling thread as the driver of an event-loop context until dropped
pub(crate) struct ContextGuard {
    previous: Option<u64>,
}

impl ContextGuard {
    pub(crate) fn enter(context_id: u64) -> Self {
        let previous = CURRENT_CONTEXT.with(|current| current.replace(Some(context_id)));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|current| current.set(self.previous));
    }
}

/// One event-loop context paired with its strand
///
/// Cloning an executor is cheap; all clones share the same strand.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    /// Position of the executor in its pool
    index: usize,
    /// Identifier of the owning context
    context_id: u64,
    /// Handle used to spawn I/O tasks on the context
    handle: Handle,
    /// Identifier of the strand
    strand_id: u64,
    /// Strand queue
    jobs: mpsc::UnboundedSender<Job>,
}

impl Executor {
    /// Create an executor on the given context and start draining its strand
    pub(crate) fn new(index: usize, context_id: u64, handle: Handle) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let strand_id = NEXT_STRAND_ID.fetch_add(1, Ordering::Relaxed);
        handle.spawn(drain_strand(strand_id, rx));
        Self {
            inner: Arc::new(ExecutorInner {
                index,
                context_id,
                handle,
                strand_id,
                jobs,
            }),
        }
    }

    /// Position of this executor within its pool
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Identifier of the strand
    pub fn strand_id(&self) -> u64 {
        self.inner.strand_id
    }

    /// Handle of the underlying event-loop context
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Check whether the calling thread is currently executing this strand
    pub fn running_in_this_thread(&self) -> bool {
        current_strand() == Some(self.inner.strand_id)
    }

    /// Check whether the calling thread drives this executor's context
    pub fn running_in_context(&self) -> bool {
        current_context() == Some(self.inner.context_id)
    }

    /// Schedule `f` on the strand; never runs inline
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.jobs.send(Box::new(f)).is_err() {
            warn!(
                strand_id = self.inner.strand_id,
                "Strand is closed, dropping handler"
            );
        }
    }

    /// Run `f` inline when already on the strand, otherwise post it
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.running_in_this_thread() {
            f();
        } else {
            self.post(f);
        }
    }

    /// Post `f` onto the strand once `delay` has elapsed
    ///
    /// Aborting the returned handle before the delay elapses drops `f`
    /// without running it.
    pub fn post_after<F>(&self, delay: Duration, f: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        // The sleep registers with the timer on first poll, inside the context
        self.spawn_then(async move { tokio::time::sleep(delay).await }, move |()| f())
    }

    /// Spawn an asynchronous operation on this executor's context
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Spawn an asynchronous operation and deliver its output on the strand
    ///
    /// Aborting the returned handle drops both the operation and the
    /// completion, releasing anything they captured.
    pub fn spawn_then<F, C>(&self, future: F, completion: C) -> AbortHandle
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        C: FnOnce(F::Output) + Send + 'static,
    {
        let strand = self.clone();
        self.spawn(async move {
            let output = future.await;
            strand.post(move || completion(output));
        })
        .abort_handle()
    }
}

impl PartialEq for Executor {
    fn eq(&self, other: &Self) -> bool {
        self.inner.strand_id == other.inner.strand_id
    }
}

impl Eq for Executor {}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("index", &self.inner.index)
            .field("context_id", &self.inner.context_id)
            .field("strand_id", &self.inner.strand_id)
            .finish()
    }
}

/// Drain a strand's queue, one handler at a time
async fn drain_strand(strand_id: u64, mut jobs: mpsc::UnboundedReceiver<Job>) {
    trace!(strand_id, "Strand started");
    while let Some(job) = jobs.recv().await {
        let _guard = StrandGuard::enter(strand_id);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            error!(
                strand_id,
                panic = panic_message(panic.as_ref()),
                "Strand handler panicked"
            );
        }
    }
    trace!(strand_id, "Strand closed");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic>"
    }
}

/// An object bound to exactly one executor for its entire lifetime
pub trait StrandBound: Shared {
    /// The executor every operation of this object runs on
    fn executor(&self) -> &Executor;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutorPool;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_post_runs_in_order() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let executor = pool.acquire();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std_mpsc::channel();
        for i in 0..100 {
            let seen = seen.clone();
            executor.post(move || seen.lock().unwrap().push(i));
        }
        executor.post(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        pool.stop().unwrap();
    }

    #[test]
    fn test_dispatch_inline_on_strand() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let executor = pool.acquire();
        assert!(!executor.running_in_this_thread());

        let (tx, rx) = std_mpsc::channel();
        let inner = executor.clone();
        executor.post(move || {
            assert!(inner.running_in_this_thread());
            let ran_inline = Arc::new(AtomicUsize::new(0));
            let flag = ran_inline.clone();
            inner.dispatch(move || {
                flag.store(1, Ordering::SeqCst);
            });
            let posted = Arc::new(AtomicUsize::new(0));
            let flag = posted.clone();
            inner.post(move || {
                flag.store(1, Ordering::SeqCst);
            });
            tx.send((
                ran_inline.load(Ordering::SeqCst),
                posted.load(Ordering::SeqCst),
            ))
            .unwrap();
        });

        let (inline, deferred) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(inline, 1, "dispatch on the strand runs inline");
        assert_eq!(deferred, 0, "post never runs inline");
        pool.stop().unwrap();
    }

    #[test]
    fn test_strand_survives_panicking_handler() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let executor = pool.acquire();

        let (tx, rx) = std_mpsc::channel();
        executor.post(|| panic!("handler failure"));
        executor.post(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        pool.stop().unwrap();
    }

    #[test]
    fn test_post_after_from_outside_the_pool() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let executor = pool.acquire();

        let (tx, rx) = std_mpsc::channel();
        let aborted_tx = tx.clone();
        let handle = executor.post_after(Duration::from_millis(200), move || {
            aborted_tx.send("aborted").unwrap();
        });
        handle.abort();
        executor.post_after(Duration::from_millis(20), move || tx.send("fired").unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fired");
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        pool.stop().unwrap();
    }

    #[test]
    fn test_spawn_then_completes_on_strand() {
        let pool = ExecutorPool::new(1).unwrap();
        pool.run().unwrap();
        let executor = pool.acquire();

        let (tx, rx) = std_mpsc::channel();
        let check = executor.clone();
        executor.spawn_then(async { 7 * 6 }, move |value| {
            tx.send((value, check.running_in_this_thread())).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (42, true));
        pool.stop().unwrap();
    }
}
