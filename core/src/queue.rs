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

//! Serialized operation queue
//!
//! Send-like operations on one connection run strictly in submission order
//! with at most one in flight. Each operation receives an [`OpSlot`]; the queue
//! advances to the next operation when that slot is dropped, wherever and
//! whenever the operation finishes with it.

use crate::{Error, Executor, Result, StrandBound, StrandCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, trace};

/// A queued operation
pub type Operation<C> = Box<dyn FnOnce(OpSlot<C>) + Send + 'static>;

struct QueueState<C: EventQueue> {
    pending: VecDeque<Operation<C>>,
    /// An operation holds the slot
    in_flight: bool,
    /// An operation is executing synchronously inside `run`
    running: bool,
    /// The running operation released its slot before returning
    advance_requested: bool,
    /// Bumped by `clear` so slots of discarded operations are ignored
    generation: u64,
}

/// FIFO of pending operations for one connection
pub struct OperationQueue<C: EventQueue> {
    state: StrandCell<QueueState<C>>,
}

impl<C: EventQueue> OperationQueue<C> {
    /// Create an empty queue owned by the executor's strand
    pub fn new(executor: &Executor) -> Self {
        Self {
            state: StrandCell::new(
                executor,
                QueueState {
                    pending: VecDeque::new(),
                    in_flight: false,
                    running: false,
                    advance_requested: false,
                    generation: 0,
                },
            ),
        }
    }

    /// Number of operations waiting behind the one in flight
    ///
    /// Must be called on the owner's strand.
    pub fn pending(&self) -> usize {
        self.state.with(|s| s.pending.len())
    }

    /// Check whether an operation currently holds the slot
    ///
    /// Must be called on the owner's strand.
    pub fn is_busy(&self) -> bool {
        self.state.with(|s| s.in_flight)
    }

    /// Discard every pending operation, returning how many were dropped
    ///
    /// The slot of an operation in flight is invalidated; releasing it later
    /// has no effect. Must be called on the owner's strand.
    pub fn clear(&self) -> usize {
        let discarded = self.state.with(|s| {
            s.generation = s.generation.wrapping_add(1);
            s.in_flight = false;
            s.advance_requested = false;
            std::mem::take(&mut s.pending)
        });
        let count = discarded.len();
        // Dropped outside the borrow; operations may own the last references
        drop(discarded);
        count
    }

    fn push(this: &Arc<C>, op: Operation<C>) {
        let start = this.event_queue().state.with(|s| {
            if s.in_flight {
                s.pending.push_back(op);
                None
            } else {
                s.in_flight = true;
                Some((op, s.generation))
            }
        });
        if let Some((op, generation)) = start {
            Self::run(this, op, generation);
        }
    }

    /// Run `op` and keep running successors that complete synchronously
    fn run(this: &Arc<C>, mut op: Operation<C>, generation: u64) {
        loop {
            this.event_queue().state.with(|s| s.running = true);
            let slot = OpSlot {
                owner: this.clone(),
                generation,
            };
            if catch_unwind(AssertUnwindSafe(move || op(slot))).is_err() {
                // The slot was released during unwinding
                error!("Queued operation panicked");
            }
            let next = this.event_queue().state.with(|s| {
                s.running = false;
                if s.generation != generation || !std::mem::take(&mut s.advance_requested) {
                    return None;
                }
                Self::take_next(s)
            });
            match next {
                Some(next) => op = next,
                None => return,
            }
        }
    }

    fn advance(this: &Arc<C>, generation: u64) {
        let next = this.event_queue().state.with(|s| {
            if s.generation != generation || !s.in_flight {
                trace!("Ignoring stale operation slot");
                return None;
            }
            if s.running {
                s.advance_requested = true;
                return None;
            }
            Self::take_next(s)
        });
        if let Some(op) = next {
            Self::run(this, op, generation);
        }
    }

    fn take_next(s: &mut QueueState<C>) -> Option<Operation<C>> {
        match s.pending.pop_front() {
            Some(op) => Some(op),
            None => {
                s.in_flight = false;
                None
            }
        }
    }
}

impl<C: EventQueue> fmt::Debug for OperationQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue").finish_non_exhaustive()
    }
}

/// Ownership of the queue's single in-flight position
///
/// Dropping the slot (or calling [`complete`](Self::complete)) advances the
/// queue. The slot also keeps the owning connection alive.
pub struct OpSlot<C: EventQueue> {
    owner: Arc<C>,
    generation: u64,
}

impl<C: EventQueue> OpSlot<C> {
    /// The connection this operation belongs to
    pub fn owner(&self) -> &Arc<C> {
        &self.owner
    }

    /// Finish the operation and let the next one run
    pub fn complete(self) {}
}

impl<C: EventQueue> Drop for OpSlot<C> {
    fn drop(&mut self) {
        let generation = self.generation;
        let executor = self.owner.executor();
        if executor.running_in_this_thread() {
            OperationQueue::advance(&self.owner, generation);
        } else {
            let owner = self.owner.clone();
            executor.post(move || OperationQueue::advance(&owner, generation));
        }
    }
}

impl<C: EventQueue> fmt::Debug for OpSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSlot")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Objects that own an [`OperationQueue`]
pub trait EventQueue: StrandBound {
    /// The object's operation queue
    fn event_queue(&self) -> &OperationQueue<Self>;

    /// Queue a send-like operation
    ///
    /// On the owning strand the operation runs immediately when the queue is
    /// idle; from any other thread the push is marshalled onto the strand.
    /// Fails with [`Error::NotShareable`] when `self` is not `Arc`-owned.
    fn push_event<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(OpSlot<Self>) + Send + 'static,
    {
        let this = self.selfptr().ok_or(Error::NotShareable)?;
        let op: Operation<Self> = Box::new(op);
        if self.executor().running_in_this_thread() {
            OperationQueue::push(&this, op);
        } else {
            self.executor()
                .post(move || OperationQueue::push(&this, op));
        }
        Ok(())
    }
}
