//! Client configuration.
//!
//! Defaults live on [`ClientDefaults`]; [`ClientConfig`] carries the values for
//! one client instance and can be deserialized from JSON or built in code.

use crate::error::{PoiesisError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values for client configuration.
pub struct ClientDefaults;

impl ClientDefaults {
    pub const RECONNECT_INTERVAL_MS: u64 = 3_000;
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;
    pub const MAX_HISTORY: usize = 100;
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;
    pub const EXPONENTIAL_MAX_DELAY_MS: u64 = 60_000;
    pub const DEFAULT_EVENT_SOURCE: &'static str = "system";
}

/// Transport-level limits.
pub struct TransportConfig;

impl TransportConfig {
    /// Largest frame the TCP transport will read or write (16 MiB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Source recorded on push events that do not name one.
    pub const DEFAULT_PUSH_SOURCE: &'static str = "server";
}

/// Delay shape between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Wait `reconnect_interval_ms` before every attempt.
    #[default]
    Fixed,
    /// Double the interval after each failed attempt, up to `max_delay_ms`.
    Exponential {
        #[serde(default = "default_exponential_max_delay_ms")]
        max_delay_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

fn default_exponential_max_delay_ms() -> u64 {
    ClientDefaults::EXPONENTIAL_MAX_DELAY_MS
}

/// Configuration for a client instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// Service endpoint handed to the transport.
    pub endpoint: String,
    /// Credential handed to the transport on open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub timeout_ms: u64,
    pub max_history: usize,
    pub backoff: BackoffStrategy,
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            reconnect_interval_ms: ClientDefaults::RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: ClientDefaults::MAX_RECONNECT_ATTEMPTS,
            timeout_ms: ClientDefaults::REQUEST_TIMEOUT_MS,
            max_history: ClientDefaults::MAX_HISTORY,
            backoff: BackoffStrategy::Fixed,
            connect_timeout_ms: ClientDefaults::CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Create a config for `endpoint` with default values for everything else.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the API key sent when the connection opens.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base delay between reconnect attempts.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set how many failed attempts are allowed before giving up.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the per-request reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how many events the bus keeps in history.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Set the reconnect backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how long a single transport open may take.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Base delay between reconnect attempts.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Per-request reply timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time allowed for a single transport open.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Check the config for values no client can work with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PoiesisError::Config {
                message: "endpoint must not be empty".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(PoiesisError::Config {
                message: "timeout_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
