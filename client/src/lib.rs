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

//! # Strandio TCP Client
//!
//! A TCP client that runs on its own event loop, with every callback
//! delivered on that loop's strand.
//!
//! ## Features
//!
//! - **Blocking or non-blocking start** - [`TcpClient::start`] waits for the
//!   connection, [`TcpClient::async_start`] reports through the `start` event
//! - **Connect timeout** - covers the connect and an optional [`Handshake`]
//! - **Silence timeout** - idle connections are closed
//! - **Reconnection Support** - automatic reconnection with a bounded number of attempts
//! - **Serialized writes** - `send` queues in order with one write in flight
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use strandio_client::{ClientConfig, Observer, TcpClient};
//!
//! let config = ClientConfig::new("localhost", 7000)
//!     .with_connect_timeout(Duration::from_secs(2))
//!     .with_auto_reconnect(true);
//! let client = TcpClient::new(config).unwrap();
//!
//! client.bind(Observer::connect(|client: &Arc<TcpClient>| {
//!     let _ = client.send("hello");
//! }));
//! client.bind(Observer::recv(|_, data| {
//!     println!("received {} bytes", data.len());
//! }));
//! client.bind(Observer::disconnect(|_, error| {
//!     println!("disconnected: {error:?}");
//! }));
//!
//! client.start().unwrap();
//! std::thread::sleep(Duration::from_secs(10));
//! client.stop().unwrap();
//! ```

mod client;
mod config;

pub use client::TcpClient;
pub use config::ClientConfig;

// Re-export the substrate types that appear in this crate's API
pub use strandio_core::{
    BoxTransport, ConnectionConfig, Error, EventKind, Handshake, Lifecycle, Observer, Result,
    Role, State, Transport,
};
