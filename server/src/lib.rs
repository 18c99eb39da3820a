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

//! # Strandio TCP Server
//!
//! A multi-threaded TCP server where every session is pinned to one event
//! loop of an [`ExecutorPool`](strandio_core::ExecutorPool) and all of its
//! callbacks run on that loop's strand.
//!
//! ## Features
//!
//! - **Round-robin placement** - one acceptor loop, sessions spread over the rest
//! - **Serialized writes** - `send` queues in order with one write in flight
//! - **Timeouts** - handshake deadline and per-session silence timeout
//! - **Session registry** - lookup, iteration and broadcast via [`SessionManager`]
//! - **Metrics** - lock-free counters with [`MetricsSnapshot`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strandio_server::{Observer, ServerConfig, TcpServer, TcpSession};
//!
//! let config = ServerConfig::new("0.0.0.0:7000".parse().unwrap()).with_pool_size(4);
//! let server = TcpServer::new(config).unwrap();
//!
//! server.bind(Observer::connect(|session: &Arc<TcpSession>| {
//!     println!("{} connected from {}", session.id(), session.peer_addr());
//! }));
//! server.bind(Observer::recv(|session: &Arc<TcpSession>, data| {
//!     let _ = session.send(data.to_vec());
//! }));
//!
//! server.start().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(60));
//! server.stop().unwrap();
//! ```

mod config;
mod manager;
mod metrics;
mod server;
mod session;
mod types;

pub use config::ServerConfig;
pub use manager::{BroadcastResult, SessionManager};
pub use crate::metrics::{MetricsSnapshot, ServerMetrics};
pub use server::TcpServer;
pub use session::TcpSession;
pub use types::{SessionId, SessionInfo};

// Re-export the substrate types that appear in this crate's API
pub use strandio_core::{
    BoxTransport, ConnectionConfig, Error, EventKind, Handshake, Observer, Result, Role, State,
    Transport,
};
