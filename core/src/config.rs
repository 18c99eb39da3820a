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

//! Per-connection configuration

use crate::socket::DEFAULT_READ_BUFFER_SIZE;
use crate::timer::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SILENCE_TIMEOUT};
use crate::{Error, Result};
use std::time::Duration;

/// Settings shared by every connection-like object
///
/// # Example
///
/// ```
/// use strandio_core::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_connect_timeout(Duration::from_secs(2))
///     .with_silence_timeout(Duration::from_secs(120));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Deadline for an outbound connect plus handshake
    pub connect_timeout: Duration,

    /// Inactivity period after which a connection is dropped
    pub silence_timeout: Duration,

    /// Size of each read
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Set the connect and handshake deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the inactivity deadline
    pub fn with_silence_timeout(mut self, timeout: Duration) -> Self {
        self.silence_timeout = timeout;
        self
    }

    /// Set the read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }

        if self.silence_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "silence_timeout must be greater than 0".to_string(),
            ));
        }

        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.silence_timeout, Duration::from_secs(3600));
        assert_eq!(config.read_buffer_size, 8192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = ConnectionConfig::default().with_connect_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ConnectionConfig::default().with_read_buffer_size(0);
        assert!(config.validate().is_err());
    }
}
