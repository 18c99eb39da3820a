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

//! Error types for the execution substrate
//!
//! Errors are `Clone` so a single failure can be handed to every listener
//! that observes it (`disconnect`, `stop`, `handshake`) without re-wrapping.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for substrate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Substrate error types
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Transport error reported by the operating system
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A connect, handshake or silence deadline elapsed
    #[error("Operation timed out")]
    TimedOut,

    /// The object was started without being owned through an `Arc`
    #[error("Object is not shareable; construct it through an Arc before starting")]
    NotShareable,

    /// `start()`/`run()` was called on an object that is already running
    #[error("Already running")]
    AlreadyRunning,

    /// The object is not running
    #[error("Not running")]
    NotRunning,

    /// A blocking call was issued from a thread it would have to join
    #[error("Blocking call from an executor pool thread would deadlock")]
    WouldDeadlock,

    /// The connection has been closed
    #[error("Connection closed")]
    Closed,

    /// The operation was canceled before it completed
    #[error("Operation aborted")]
    Aborted,

    /// The peer closed the connection
    #[error("End of stream")]
    Eof,

    /// The protocol handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// A configuration value was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Transport errors are kept as they are; `TimedOut` and `Eof` only come from
/// the timers and the read loop.
impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl Error {
    /// Check if the error is a timeout synthesized by a timer
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those where reconnecting or retrying the
    /// operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TimedOut | Error::Closed | Error::Eof | Error::Io(_) | Error::Handshake(_)
        )
    }

    /// Check if the error describes a misuse of the lifecycle API
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::NotShareable | Error::AlreadyRunning | Error::WouldDeadlock
        )
    }

    /// Check if the error indicates the process ran out of descriptors
    ///
    /// Accept loops treat this as a dropped connection attempt.
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            Error::Io(e) => is_resource_exhausted(e),
            _ => false,
        }
    }

    /// Get the underlying I/O error kind, if any
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            Error::TimedOut => Some(io::ErrorKind::TimedOut),
            Error::Eof => Some(io::ErrorKind::UnexpectedEof),
            _ => None,
        }
    }
}

/// Check whether an I/O error reports descriptor exhaustion (EMFILE/ENFILE)
pub fn is_resource_exhausted(error: &io::Error) -> bool {
    // EMFILE = 24, ENFILE = 23 on every unix we target
    matches!(error.raw_os_error(), Some(23) | Some(24))
}
