//! Configuration for the long-polling transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_IDLE_TIMEOUT_MS;

/// Configuration for long-polling sessions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongpollConfig {
    /// How long a session may go without a bound exchange before it is closed.
    ///
    /// Armed when an exchange finishes after delivering data, cancelled by the
    /// next poll. Default: 3 seconds (3,000 ms)
    pub idle_timeout_ms: u64,

    /// Maximum accepted size of a client-to-server message body in bytes.
    ///
    /// Default: 1 MB (1,048,576 bytes)
    pub max_body_size: usize,

    /// Prefix prepended to generated session ids.
    ///
    /// Default: empty
    pub session_id_prefix: String,
}

impl Default for LongpollConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_body_size: 1024 * 1024, // 1 MB
            session_id_prefix: String::new(),
        }
    }
}

impl LongpollConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a minimal configuration for testing.
    pub fn minimal() -> Self {
        Self {
            idle_timeout_ms: 250,
            max_body_size: 64 * 1024, // 64 KB
            session_id_prefix: String::new(),
        }
    }

    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set maximum body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the session id prefix.
    pub fn with_session_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_id_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LongpollConfig::default();
        assert_eq!(config.idle_timeout_ms, 3_000);
        assert_eq!(config.idle_timeout(), Duration::from_secs(3));
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let config = LongpollConfig::new()
            .with_idle_timeout_ms(10_000)
            .with_max_body_size(512)
            .with_session_id_prefix("lp-");

        assert_eq!(config.idle_timeout_ms, 10_000);
        assert_eq!(config.max_body_size, 512);
        assert_eq!(config.session_id_prefix, "lp-");
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: LongpollConfig = serde_json::from_str(r#"{"idle_timeout_ms": 500}"#)
            .expect("valid config json");
        assert_eq!(config.idle_timeout_ms, 500);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }
}
