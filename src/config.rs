//! Transport configuration.
//!
//! Every knob has a `DEFAULT_*` constant and the whole struct can be read
//! from JSON, with missing keys falling back to the defaults. Durations are
//! written as integer milliseconds.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use nodelink::TransportConfig;
//!
//! let config = TransportConfig::from_json(r#"{ "backlog_max_memory": 1024, "data_timeout": 5000 }"#).unwrap();
//! assert_eq!(config.backlog_max_memory, 1024);
//! assert_eq!(config.data_timeout, Duration::from_secs(5));
//! assert_eq!(config.connect_timeout, nodelink::config::DEFAULT_CONNECT_TIMEOUT);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::protocol::DEFAULT_READ_BUFFER_LIMIT;

/// Default in-memory budget of a node backlog (500 MiB).
pub const DEFAULT_BACKLOG_MAX_MEMORY: u64 = 500 << 20;

/// Default on-disk budget of a node backlog (10 GiB).
pub const DEFAULT_BACKLOG_MAX_FILE: u64 = 10 << 30;

/// Default file name prefix of backlog files.
pub const DEFAULT_BACKLOG_PREFIX: &str = "daemon";

/// How long a routed event may wait for the socket to become writable.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-iteration writability wait while draining a backlog.
pub const DEFAULT_DRAIN_WAIT: Duration = Duration::from_millis(10);

/// Outbound connects still pending after this long are abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimum spacing between connect attempts to one node.
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connected nodes silent for longer than this are disconnected
/// (two pulse intervals).
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(20);

/// Event loop tick.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for [`EventTransport`](crate::EventTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Directory holding backlog files.
    pub backlog_dir: PathBuf,
    /// Backlog files are named `<prefix>.<node>.binlog`.
    pub backlog_prefix: String,
    pub backlog_max_memory: u64,
    pub backlog_max_file: u64,
    #[serde(with = "millis")]
    pub send_timeout: Duration,
    #[serde(with = "millis")]
    pub drain_wait: Duration,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub connect_interval: Duration,
    #[serde(with = "millis")]
    pub data_timeout: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Upper bound of buffered, not yet parsed input per node.
    pub read_buffer_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backlog_dir: std::env::temp_dir(),
            backlog_prefix: DEFAULT_BACKLOG_PREFIX.to_string(),
            backlog_max_memory: DEFAULT_BACKLOG_MAX_MEMORY,
            backlog_max_file: DEFAULT_BACKLOG_MAX_FILE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            drain_wait: DEFAULT_DRAIN_WAIT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_interval: DEFAULT_CONNECT_INTERVAL,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_buffer_limit: DEFAULT_READ_BUFFER_LIMIT,
        }
    }
}

impl TransportConfig {
    /// Parse a JSON document. Unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the transport misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.backlog_prefix.is_empty() || self.backlog_prefix.contains('/') {
            return Err(TransportError::Config(format!(
                "invalid backlog prefix {:?}",
                self.backlog_prefix
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(TransportError::Config(
                "poll_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the backlog file for a node.
    pub fn backlog_path(&self, node_name: &str) -> PathBuf {
        self.backlog_dir
            .join(format!("{}.{}.binlog", self.backlog_prefix, node_name))
    }

    pub fn with_backlog_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.backlog_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_backlog_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.backlog_prefix = prefix.into();
        self
    }

    pub fn with_backlog_limits(mut self, max_memory: u64, max_file: u64) -> Self {
        self.backlog_max_memory = max_memory;
        self.backlog_max_file = max_file;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
