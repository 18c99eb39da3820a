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

//! Strand-based Execution Substrate
//!
//! This crate provides the asynchronous execution and connection-lifecycle
//! framework that the TCP server and client are built on:
//!
//! - A pool of single-threaded event loops with round-robin assignment
//! - Per-connection strands that serialize every handler without locks
//! - Self-ownership so pending operations keep their connection alive
//! - A serialized operation queue with at most one write in flight
//! - Connect and silence timeouts that race cancellation atomically
//! - Typed event listeners
//! - The start/stop state machine shared by every connection-like object
//!
//! # Architecture
//!
//! ```text
//! ExecutorPool
//!     ↓ acquire()
//! Executor (context + strand)
//!     ↓
//! ConnectionCore ─ SelfRef, AtomicState, OperationQueue, SocketComponent,
//!                  ConnectTimeout, SilenceTimeout
//!     ↓
//! Connection (Lifecycle + EventQueue) → ListenerRegistry
//! ```

/// Check a lifecycle contract
///
/// A violation is logged and the check evaluates to `false`, letting the
/// caller return an error. When this crate is built with the
/// `strict-asserts` feature a violation also fails a debug assertion.
#[doc(hidden)]
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::__private::tracing::error!($($arg)+);
            if $crate::__private::STRICT_ASSERTS {
                debug_assert!(ok, $($arg)+);
            }
        }
        ok
    }};
}

#[doc(hidden)]
pub mod __private {
    pub use tracing;

    pub const STRICT_ASSERTS: bool = cfg!(feature = "strict-asserts");
}

mod cell;
mod config;
mod connection;
mod error;
mod executor;
mod lifecycle;
mod listener;
mod ownership;
mod pool;
mod queue;
mod socket;
mod state;
mod timer;

pub use cell::StrandCell;
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionCore};
pub use error::{Error, Result, is_resource_exhausted};
pub use executor::{Executor, StrandBound};
pub use lifecycle::Lifecycle;
pub use listener::{EventKind, ListenerRegistry, Observer};
pub use ownership::{SelfRef, Shared};
pub use pool::{ExecutorPool, default_pool_size};
pub use queue::{EventQueue, OpSlot, Operation, OperationQueue};
pub use socket::{
    BoxTransport, DEFAULT_READ_BUFFER_SIZE, Handshake, Role, SocketComponent, Transport,
};
pub use state::{AtomicState, State};
pub use timer::{
    ConnectTimeout, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SILENCE_TIMEOUT, SilenceTimeout, TimerState,
    silence_remaining,
};
