//! Inference error types.
//!
//! Structured logging is the caller's responsibility; the variants carry the
//! context a log entry or a user-facing message needs.

use thiserror::Error;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body did not have the Messages API shape.
    #[error("invalid model response: {reason}")]
    InvalidResponse { reason: String },

    /// Missing API key, bad base URL, and similar setup problems.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Rate limits and server-side failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::HttpError { status, .. } => *status == 429 || *status >= 500,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => true,
            _ => false,
        }
    }
}
