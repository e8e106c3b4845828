//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so a file
//! only needs the values it changes. Durations are whole milliseconds. CLI
//! flags override file values in the binary.

use std::{path::Path, time::Duration};

use palisade_crypto::{TransportKeys, derive_transport_keys};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Secret used when none is configured. Development only.
const DEV_TRANSPORT_SECRET: &str = "7061c4d150fe3aa4eee9b1ba34f52c6b8d1fd2bd8e8a4ab0c8e92e3a7b5d1f09";

/// Channel server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. "0.0.0.0:54001")
    pub bind_address: String,
    /// Number of sibling channel servers started by the binary
    pub channel_count: u16,
    /// Maximum concurrent sessions per channel; further connections are closed
    pub max_connections: usize,
    /// Sessions silent for longer than this are logged out
    pub idle_timeout_ms: u64,
    /// Interval between idle sweeps
    pub sweep_interval_ms: u64,
    /// Per-session outbound queue capacity
    pub send_queue_capacity: usize,
    /// Longest the send loop sleeps on an empty queue
    pub send_idle_wait_ms: u64,
    /// Polls made by a stage binary wait before giving up
    pub binary_wait_attempts: u32,
    /// Spacing between stage binary wait polls
    pub binary_wait_interval_ms: u64,
    /// Capacity of stages created implicitly on first entry
    pub default_stage_capacity: u16,
    /// 32-byte transport secret, hex encoded
    pub transport_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:54001".to_string(),
            channel_count: 1,
            max_connections: 10_000,
            idle_timeout_ms: 30_000,
            sweep_interval_ms: 5_000,
            send_queue_capacity: 20,
            send_idle_wait_ms: 10,
            binary_wait_attempts: 10,
            binary_wait_interval_ms: 1_000,
            default_stage_capacity: 100,
            transport_secret: DEV_TRANSPORT_SECRET.to_string(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the document is not valid TOML for this
    ///   struct or fails [`ServerConfig::validate`]
    pub fn from_toml(content: &str) -> Result<Self, ServerError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ServerError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Check values that would make the server misbehave.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` naming the first bad field
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.send_queue_capacity == 0 {
            return Err(ServerError::Config("send_queue_capacity must be at least 1".into()));
        }
        if self.binary_wait_attempts == 0 {
            return Err(ServerError::Config("binary_wait_attempts must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ServerError::Config("sweep_interval_ms must be non-zero".into()));
        }
        if self.channel_count == 0 {
            return Err(ServerError::Config("channel_count must be at least 1".into()));
        }
        self.transport_keys().map(|_| ())
    }

    /// Derive per-direction transport keys from `transport_secret`.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the secret is not hex or is too short
    pub fn transport_keys(&self) -> Result<TransportKeys, ServerError> {
        let secret = hex::decode(self.transport_secret.trim())
            .map_err(|e| ServerError::Config(format!("transport_secret is not hex: {e}")))?;
        derive_transport_keys(&secret).map_err(|e| ServerError::Config(format!("transport_secret: {e}")))
    }

    /// Idle threshold for the sweep.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Send loop idle wait.
    #[must_use]
    pub fn send_idle_wait(&self) -> Duration {
        Duration::from_millis(self.send_idle_wait_ms)
    }

    /// Stage binary wait spacing.
    #[must_use]
    pub fn binary_wait_interval(&self) -> Duration {
        Duration::from_millis(self.binary_wait_interval_ms)
    }
}
