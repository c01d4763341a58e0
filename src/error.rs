//! Error types for chatwire
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur on either side of the wire
#[derive(Debug, Error)]
pub enum WireError {
    /// Could not establish a connection after bounded retries
    #[error("Connection error: failed to connect to {addr} after {attempts} attempts: {source}")]
    Connection {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// An established stream failed during read/write
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// A response was requested while no connection is live
    #[error("Not connected")]
    NotConnected,

    /// A value could not be decoded into the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A business handler failed mid-dispatch
    #[error("Handler error: {0}")]
    Handler(String),

    /// Invalid action registration
    #[error("Registry error: {0}")]
    Registry(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    /// Whether the connection that produced this error is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Protocol(_))
    }
}

/// Result type alias for chatwire operations
pub type Result<T> = std::result::Result<T, WireError>;
