use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by fallible setup calls (config loading, spawning, joining).
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Faults the connection manager reports locally.
///
/// None of these reach the presentation layer; they only show up in logs and,
/// indirectly, as a change of the connection status.
#[derive(Debug, Error)]
pub enum LinkFault {
    #[error("Could not create WebSocket for {url}: {reason}")]
    Construction { url: String, reason: String },

    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("WebSocket handshake did not finish within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("Malformed envelope: binary frame is not valid UTF-8")]
    NonUtf8Frame,

    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("Max reconnection attempts reached ({0})")]
    RetriesExhausted(u32),
}
