//! Error types for vigil-core

use thiserror::Error;

/// Main error type for the vigil-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Datastore API error (non-2xx response)
    #[error("datastore error ({status}): {body}")]
    Datastore { status: u16, body: String },

    /// Another exporter instance holds the PID file
    #[error("another exporter is already running (pid {0})")]
    AlreadyRunning(u32),

    /// Service manager (launchctl) failure
    #[error("service manager error: {0}")]
    Service(String),
}

impl Error {
    /// Whether this error looks like an authentication failure.
    ///
    /// Used by the open command to print a credentials hint instead of a
    /// connectivity hint.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Datastore { status, body } => {
                matches!(status, 401 | 403) || body.contains("401") || body.contains("403")
            }
            _ => false,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Datastore { status, .. } => *status >= 500,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

/// Result type alias for vigil-core
pub type Result<T> = std::result::Result<T, Error>;
