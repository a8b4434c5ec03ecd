//! Error types for loading, planning and submitting a bulk run.

use thiserror::Error;

/// Errors that abort a run before any row is processed, or reject a single envelope.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Contact file could not be used.
    #[error("load error: {0}")]
    Load(String),

    /// Run parameters are unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Envelope could not be built.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the provider transport. Always recoverable within a run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("transport not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::MalformedResponse(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
