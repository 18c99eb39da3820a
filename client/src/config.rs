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

//! Client configuration

use std::time::Duration;
use strandio_core::{ConnectionConfig, Error, Result};

/// TCP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or IP address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Connect/handshake deadline, silence timeout and read buffer size
    pub connection: ConnectionConfig,

    /// Disable Nagle's algorithm on the connected socket
    pub nodelay: bool,

    /// Reconnect when an established connection drops
    pub auto_reconnect: bool,

    /// Delay before each reconnection attempt
    pub reconnect_delay: Duration,

    /// Maximum number of consecutive failed reconnection attempts (None for unlimited)
    pub max_reconnect_attempts: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            nodelay: true,
            auto_reconnect: false,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: Some(3),
        }
    }
}

impl ClientConfig {
    /// Create a new client configuration with the given host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the connect and handshake deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    /// Set the inactivity deadline
    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.connection.silence_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.connection.read_buffer_size = size;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Enable automatic reconnection
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the reconnection delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnection attempts
    pub fn with_max_reconnect_attempts(mut self, max: Option<usize>) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }

        if self.port == 0 {
            return Err(Error::InvalidConfig("port must not be 0".to_string()));
        }

        if self.auto_reconnect && self.max_reconnect_attempts == Some(0) {
            return Err(Error::InvalidConfig(
                "max_reconnect_attempts must be greater than 0 when reconnecting".to_string(),
            ));
        }

        self.connection.validate()
    }
}
