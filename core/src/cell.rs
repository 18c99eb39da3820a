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

//! Strand-guarded interior mutability
//!
//! Per-connection state is protected by strand affinity instead of a lock.
//! A [`StrandCell`] only hands out access while the calling thread is
//! executing the owning strand, and never hands out two borrows at once.

use crate::Executor;
use crate::executor::current_strand;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cell whose contents may only be touched from one strand
pub struct StrandCell<T> {
    strand_id: u64,
    borrowed: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: every shared access goes through `with`, which requires the caller
// to be running on the owning strand. A strand is drained by one task on a
// current-thread runtime, and that runtime is driven by exactly one OS thread
// (see `pool.rs`), so every access happens on that thread. The thread-local
// strand marker is only set while the drain task runs a handler, handlers run
// one after another, and the `borrowed` flag rejects re-entrant access from
// inside a handler. The flag is cleared by `Release` on unwind as well, so a
// panicking borrow leaves the cell usable.
unsafe impl<T: Send> Sync for StrandCell<T> {}

impl<T> StrandCell<T> {
    /// Create a cell owned by the executor's strand
    pub fn new(executor: &Executor, value: T) -> Self {
        Self {
            strand_id: executor.strand_id(),
            borrowed: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Check whether the calling thread may access the cell
    pub fn is_accessible(&self) -> bool {
        current_strand() == Some(self.strand_id)
    }

    /// Run `f` with exclusive access to the contents
    ///
    /// # Panics
    ///
    /// Panics when called off the owning strand or from inside another
    /// `with` on the same cell.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        assert!(
            self.is_accessible(),
            "StrandCell accessed outside of strand {}",
            self.strand_id
        );
        assert!(
            !self.borrowed.swap(true, Ordering::Acquire),
            "StrandCell borrowed re-entrantly"
        );
        let _release = Release(&self.borrowed);
        // SAFETY: on the owning strand and not already borrowed (checked above)
        f(unsafe { &mut *self.value.get() })
    }

    /// Exclusive access through a unique reference, from any thread
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the cell, returning the contents
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

struct Release<'a>(&'a AtomicBool);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T> fmt::Debug for StrandCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrandCell")
            .field("strand_id", &self.strand_id)
            .field("borrowed", &self.borrowed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
