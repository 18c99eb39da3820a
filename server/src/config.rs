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

//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use strandio_core::{ConnectionConfig, Error, Result};

/// Server configuration
///
/// Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use strandio_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new("0.0.0.0:7000".parse().unwrap())
///     .with_pool_size(4)
///     .with_max_connections(500)
///     .with_silence_timeout(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: SocketAddr,

    /// Number of event loops; 0 uses the available hardware concurrency
    pub pool_size: usize,

    /// Maximum number of concurrent sessions
    ///
    /// Connections accepted beyond this limit are closed immediately.
    pub max_connections: usize,

    /// How long `stop()` waits for sessions to finish tearing down
    pub shutdown_timeout: Duration,

    /// Pause after an accept failure before accepting again
    pub accept_backoff: Duration,

    /// Listen backlog
    pub backlog: u32,

    /// Settings applied to every session
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            pool_size: 0,
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(30),
            accept_backoff: Duration::from_millis(100),
            backlog: 1024,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given bind address
    ///
    /// All other settings will use their default values.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            ..Default::default()
        }
    }

    /// Set the number of event loops
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the maximum number of concurrent sessions
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the pause after an accept failure
    pub fn with_accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// Set the listen backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the handshake deadline for accepted sessions
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    /// Set the inactivity deadline for sessions
    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.connection.silence_timeout = timeout;
        self
    }

    /// Set the per-read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.connection.read_buffer_size = size;
        self
    }

    /// Replace every per-session setting at once
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        if self.backlog == 0 {
            return Err(Error::InvalidConfig(
                "backlog must be greater than 0".to_string(),
            ));
        }

        self.connection.validate()
    }
}
