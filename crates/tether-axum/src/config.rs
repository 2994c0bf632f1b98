//! Server configuration for the axum integration.

use std::time::Duration;

use tether_longpoll::LongpollConfig;
use tracing::warn;

/// Environment variable overriding [`LongpollServerConfig::bind_addr`].
pub const ENV_BIND_ADDR: &str = "TETHER_BIND_ADDR";
/// Environment variable overriding [`LongpollServerConfig::endpoint_path`].
pub const ENV_ENDPOINT_PATH: &str = "TETHER_ENDPOINT_PATH";
/// Environment variable overriding the session idle timeout, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "TETHER_IDLE_TIMEOUT_MS";
/// Environment variable setting [`LongpollServerConfig::poll_timeout`], in milliseconds.
pub const ENV_POLL_TIMEOUT_MS: &str = "TETHER_POLL_TIMEOUT_MS";

/// Configuration of the long-polling HTTP server.
#[derive(Debug, Clone)]
pub struct LongpollServerConfig {
    /// Bind address (default: 127.0.0.1:8080)
    pub bind_addr: String,

    /// Path of the long-polling endpoint (default: "/vibe")
    pub endpoint_path: String,

    /// Additional HTTP-level limit on how long a request may be held open
    /// before it is answered empty. With `None` a held poll still ends
    /// empty once the session idle timeout elapses.
    pub poll_timeout: Option<Duration>,

    /// Enable response compression
    pub enable_compression: bool,

    /// Session settings
    pub longpoll: LongpollConfig,
}

impl Default for LongpollServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            endpoint_path: "/vibe".to_string(),
            poll_timeout: None,
            enable_compression: true,
            longpoll: LongpollConfig::default(),
        }
    }
}

impl LongpollServerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from defaults overridden by `TETHER_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup(ENV_ENDPOINT_PATH) {
            config = config.with_endpoint_path(path);
        }
        if let Some(ms) = parse_millis(&lookup, ENV_IDLE_TIMEOUT_MS) {
            config.longpoll.idle_timeout_ms = ms;
        }
        if let Some(ms) = parse_millis(&lookup, ENV_POLL_TIMEOUT_MS) {
            config.poll_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        config
    }

    /// Builder method: Set the bind address
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Builder method: Set the endpoint path. A missing leading `/` is added.
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.endpoint_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Builder method: Limit how long a request is held open
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Builder method: Enable or disable response compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Builder method: Replace the session settings
    pub fn with_longpoll(mut self, longpoll: LongpollConfig) -> Self {
        self.longpoll = longpoll;
        self
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            warn!(variable = key, value = %raw, "ignoring invalid millisecond value");
            None
        }
    }
}
