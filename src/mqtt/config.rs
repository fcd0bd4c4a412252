use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::ReconnectPolicy;
use crate::error::ViewerError;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws/mqtt/";

/// Settings for one bridge connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub url: String,
    pub heartbeat_interval_ms: u64,
    /// Upper bound for TCP connect plus the WebSocket handshake. Expiry counts
    /// as a failed connection and goes through the normal retry path.
    pub connect_timeout_ms: u64,
    pub history_capacity: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            history_capacity: 1000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl LinkConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if self.url.trim().is_empty() {
            return Err(ViewerError::InvalidConfig("url must not be empty".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ViewerError::InvalidConfig(
                "heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ViewerError::InvalidConfig(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ViewerError::InvalidConfig(
                "history_capacity must be greater than zero".into(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ViewerError::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) is below reconnect.base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        Ok(())
    }
}
