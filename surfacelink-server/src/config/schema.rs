//! Configuration schema structs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surfacelink_protocol::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub transport: TransportConfig,
    pub catalog: CatalogConfig,
}

/// Socket, timeout and retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Bind address for the listener
    pub host: String,
    /// TCP port (default 9877)
    pub port: u16,
    /// Per-attempt limit when dialing outbound peers
    pub connect_timeout_secs: u64,
    /// Connection attempts before an outbound peer is reported failed
    pub max_retries: u32,
    /// Delay before the second attempt; doubles on each further attempt
    pub retry_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_retry_delay_ms: u64,
    /// Close connections that send nothing for this long (0 disables)
    pub idle_timeout_secs: u64,
    /// How long a client waits for a command result
    pub command_timeout_secs: u64,
    /// Initial read buffer capacity per connection
    pub read_buffer_size: usize,
    /// Largest accepted or emitted frame body
    pub max_message_size: usize,
    /// Connection monitor tick
    pub monitor_interval_ms: u64,
    /// Peers this process dials and serves (`host:port`)
    pub outbound: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 15,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            idle_timeout_secs: 300,
            command_timeout_secs: 10,
            read_buffer_size: 8192,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            monitor_interval_ms: 1000,
            outbound: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// `host:port` listen address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Idle timeout, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Reference host catalog settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON catalog tree served by the reference host; built-in tree when unset
    pub file: Option<PathBuf>,
}
