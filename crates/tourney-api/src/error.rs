//! Error types for tourney-api

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the tournament backend client.
///
/// Only [`ApiError::Transport`] and [`ApiError::RateLimited`] are retried.
/// [`ApiError::QuietZoneConflict`] must unwind every enclosing loop.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Connection, timeout or protocol-level failure, including a 200 response
    /// that is not the structured format the endpoint promises
    #[error("transport error: {0}")]
    Transport(String),

    /// 429 from the backend
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 401 / 403
    #[error("authentication failed: {message} (status={status})")]
    Authentication { status: u16, message: String },

    /// 400 / 422
    #[error("validation failed: {message} (status={status})")]
    Validation { status: u16, message: String },

    /// 404
    #[error("not found: {0}")]
    NotFound(String),

    /// 409: the backend is not accepting submissions right now
    #[error("quiet zone: {0}")]
    QuietZoneConflict(String),

    /// Any other error status
    #[error("server error: {message} (status={status})")]
    Server { status: u16, message: String },

    /// Response body could not be decoded into the expected model
    #[error("decode error: {0}")]
    Decode(String),

    /// Signing oracle failure (missing key, malformed secret)
    #[error("signing error: {0}")]
    Signing(String),

    /// Local file error while streaming uploads or downloads
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Whether the retry policy may repeat the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::RateLimited { .. })
    }

    /// Whether this is the distinguished quiet-zone conflict.
    pub fn is_quiet_zone(&self) -> bool {
        matches!(self, ApiError::QuietZoneConflict(_))
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Authentication { status, .. }
            | ApiError::Validation { status, .. }
            | ApiError::Server { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            ApiError::QuietZoneConflict(_) => Some(409),
            _ => None,
        }
    }

    /// Map an error status and its already-formatted message onto the taxonomy.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ApiError::Authentication { status, message },
            404 => ApiError::NotFound(message),
            400 | 422 => ApiError::Validation { status, message },
            409 => ApiError::QuietZoneConflict(message),
            429 => ApiError::RateLimited {
                message,
                retry_after,
            },
            _ => ApiError::Server { status, message },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

impl From<serde_yaml::Error> for ApiError {
    fn from(err: serde_yaml::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}
