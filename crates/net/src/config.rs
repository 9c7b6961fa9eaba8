//! Transport configuration
//!
//! Loaded from TOML or assembled with [`NetConfig::builder`]. Every field has
//! a default, so an empty file is a valid configuration:
//!
//! ```toml
//! delimiter = "\n"
//! port = 11000
//! read_buffer_size = 4096
//! connect_timeout_ms = 5000
//! write_timeout_ms = 10000
//! nodelay = true
//! max_pending_bytes = 1048576
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Settings shared by every endpoint created from one connector or listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    /// Character terminating each message on the wire, in both directions
    pub delimiter: char,
    /// Port used when the caller does not name one
    pub port: u16,
    /// Size of the per-endpoint read chunk
    pub read_buffer_size: usize,
    /// Connect timeout in milliseconds (0 disables it)
    pub connect_timeout_ms: u64,
    /// Per-send write timeout in milliseconds (0 disables it)
    pub write_timeout_ms: u64,
    /// Disable Nagle's algorithm on every socket
    pub nodelay: bool,
    /// Largest undelimited tail the receive loop will hold before faulting
    pub max_pending_bytes: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            delimiter: '\n',
            port: crate::DEFAULT_PORT,
            read_buffer_size: 4096,
            connect_timeout_ms: 5000,
            write_timeout_ms: 10_000,
            nodelay: true,
            max_pending_bytes: 1024 * 1024,
        }
    }
}

impl NetConfig {
    /// Create a new config builder
    pub fn builder() -> NetConfigBuilder {
        NetConfigBuilder::default()
    }

    /// Parse a TOML document
    pub fn from_toml(s: &str) -> Result<Self> {
        let config: NetConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be greater than zero".into()));
        }
        if self.max_pending_bytes == 0 {
            return Err(Error::Config("max_pending_bytes must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.write_timeout_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Builder for NetConfig
#[derive(Default)]
pub struct NetConfigBuilder {
    config: NetConfig,
}

impl NetConfigBuilder {
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    pub fn max_pending_bytes(mut self, bytes: usize) -> Self {
        self.config.max_pending_bytes = bytes;
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<NetConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
