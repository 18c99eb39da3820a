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

//! Executor pool implementation
//!
//! The pool owns N event-loop contexts and, while running, N worker threads.
//! Each context is a single-threaded tokio runtime driven by exactly one
//! worker thread, so there is no work stealing across contexts.
//!
//! ```text
//! ExecutorPool
//!     ├── context 0 ── worker thread 0 ── Executor 0 (strand)
//!     ├── context 1 ── worker thread 1 ── Executor 1 (strand)
//!     └── ...
//! ```

use crate::executor::{ContextGuard, current_context};
use crate::{Error, Executor, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduler turns run after a context is told to stop
const DRAIN_TURNS: usize = 8;

/// One event-loop context
struct IoContext {
    id: u64,
    index: usize,
    runtime: Option<Runtime>,
}

impl IoContext {
    fn new(index: usize) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("strandio-io-{index}"))
            .build()?;
        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            index,
            runtime: Some(runtime),
        })
    }

    /// Drive the context until the work guard is released
    fn drive(&self, work: oneshot::Receiver<()>) {
        let _context = ContextGuard::enter(self.id);
        debug!(context = self.index, "Event loop running");
        if let Some(runtime) = self.runtime.as_ref() {
            runtime.block_on(async {
                // Resolves on release or when the sender is dropped
                let _ = work.await;
                // Give handlers released by a final teardown a chance to
                // close their sockets before the loop parks
                for _ in 0..DRAIN_TURNS {
                    tokio::task::yield_now().await;
                }
            });
        }
        debug!(context = self.index, "Event loop stopped");
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// A running worker thread and the guard keeping its context alive
struct Worker {
    guard: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// Pool of event-loop contexts with round-robin executor assignment
pub struct ExecutorPool {
    contexts: Vec<Arc<IoContext>>,
    executors: Vec<Executor>,
    next: AtomicUsize,
    running: AtomicBool,
    workers: Mutex<Vec<Worker>>,
}

impl ExecutorPool {
    /// Create a pool with `size` contexts
    ///
    /// A size of 0 is replaced by the available hardware concurrency.
    pub fn new(size: usize) -> Result<Self> {
        let size = if size == 0 { default_pool_size() } else { size };

        let mut contexts = Vec::with_capacity(size);
        let mut executors = Vec::with_capacity(size);
        for index in 0..size {
            let context = IoContext::new(index)?;
            if let Some(runtime) = context.runtime.as_ref() {
                executors.push(Executor::new(index, context.id, runtime.handle().clone()));
            }
            contexts.push(Arc::new(context));
        }

        debug!(size, "Executor pool created");

        Ok(Self {
            contexts,
            executors,
            next: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Number of contexts in the pool
    pub fn size(&self) -> usize {
        self.executors.len()
    }

    /// Check if the worker threads are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start one worker thread per context
    #[instrument(skip(self), fields(size = self.size()))]
    pub fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            contract!(false, "ExecutorPool::run called while already running");
            return Err(Error::AlreadyRunning);
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for context in &self.contexts {
            let (guard, work) = oneshot::channel();
            let driver = context.clone();
            let spawned = thread::Builder::new()
                .name(format!("strandio-io-{}", context.index))
                .spawn(move || driver.drive(work));
            match spawned {
                Ok(thread) => workers.push(Worker { guard, thread }),
                Err(e) => {
                    error!(error = %e, "Failed to spawn executor thread");
                    let started = std::mem::take(&mut *workers);
                    drop(workers);
                    join_workers(started);
                    self.running.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
        }

        info!("Executor pool running");
        Ok(())
    }

    /// Release every context and join the worker threads
    ///
    /// Contexts keep their parked tasks, so a later [`run`](Self::run) resumes
    /// them. Must not be called from one of the pool's own threads, since a
    /// thread cannot join itself.
    #[instrument(skip(self), fields(size = self.size()))]
    pub fn stop(&self) -> Result<()> {
        if self.running_in_pool_thread() {
            contract!(false, "ExecutorPool::stop called from one of its own threads");
            return Err(Error::WouldDeadlock);
        }

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if workers.is_empty() {
            return Ok(());
        }

        join_workers(workers);
        self.running.store(false, Ordering::Release);
        info!("Executor pool stopped");
        Ok(())
    }

    /// Next executor, round-robin over the pool
    pub fn acquire(&self) -> Executor {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.executors.len();
        self.executors[index].clone()
    }

    /// Executor at a fixed position
    pub fn get(&self, index: usize) -> Option<&Executor> {
        self.executors.get(index)
    }

    /// Check whether the calling thread is one of this pool's workers
    pub fn running_in_pool_thread(&self) -> bool {
        match current_context() {
            Some(id) => self.contexts.iter().any(|context| context.id == id),
            None => false,
        }
    }
}

fn join_workers(workers: Vec<Worker>) {
    let mut threads = Vec::with_capacity(workers.len());
    for Worker { guard, thread } in workers {
        let _ = guard.send(());
        threads.push(thread);
    }
    for thread in threads {
        if thread.join().is_err() {
            error!("Executor thread panicked");
        }
    }
}

/// Hardware concurrency, falling back to a single context
pub fn default_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        if !self.is_running() {
            return;
        }
        if self.running_in_pool_thread() {
            // Signal the workers and let them exit once the current handler returns
            let workers =
                std::mem::take(self.workers.get_mut().unwrap_or_else(PoisonError::into_inner));
            for worker in workers {
                let _ = worker.guard.send(());
            }
            debug!("Executor pool dropped from a worker thread, detaching workers");
        } else if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop executor pool on drop");
        }
    }
}

impl fmt::Debug for ExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorPool")
            .field("size", &self.size())
            .field("running", &self.is_running())
            .finish()
    }
}
