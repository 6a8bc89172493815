//! Error types for the cadence library.
//!
//! One structured variant per failure class, so callers can tell a
//! recoverable discovery delay from a fatal protocol or storage fault.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for cadence operations.
#[derive(Debug, Error)]
pub enum CadenceError {
    // Filesystem errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Rendezvous errors
    #[error("Handshake timed out after {waited:?} waiting for {path}")]
    HandshakeTimeout { path: PathBuf, waited: Duration },

    // Channel errors
    #[error("Invalid channel address {address:?}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Connection to {address} failed: {message}")]
    ConnectFailed { address: String, message: String },

    #[error("Protocol error: unknown message tag {tag}")]
    UnknownTag { tag: u8 },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Orchestration errors
    #[error("Failed to launch {name}: {message}")]
    LaunchFailed { name: String, message: String },

    #[error("{failed} child process(es) exited with failure: {details}")]
    ChildrenFailed { failed: usize, details: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for cadence operations.
pub type Result<T> = std::result::Result<T, CadenceError>;

impl From<std::io::Error> for CadenceError {
    fn from(err: std::io::Error) -> Self {
        let message = err.to_string();
        CadenceError::Io {
            message,
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CadenceError {
    fn from(err: serde_json::Error) -> Self {
        let message = err.to_string();
        CadenceError::Json {
            message,
            source: Some(err),
        }
    }
}
