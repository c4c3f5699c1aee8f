//! Error types for the KoSync proxy
//!
//! Only [`ProxyError`] ever reaches a client. Tracking-side errors are logged
//! and never change what the reader sees.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use db_pool::env_utils::EnvParseError;
use thiserror::Error;

use crate::models::SessionKey;

/// Result type for the forwarding path
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Failures of the forwarding layer itself.
///
/// A non-success status returned by the upstream is not an error here; it is
/// relayed to the client verbatim.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Upstream connection timeout")]
    UpstreamTimeout,

    #[error("Cannot connect to upstream: {0}")]
    UpstreamUnavailable(String),

    #[error("Request error to upstream: {0}")]
    UpstreamRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnavailable(_) | ProxyError::UpstreamRequest(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
        }))
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::UpstreamTimeout
        } else if err.is_connect() {
            ProxyError::UpstreamUnavailable(err.to_string())
        } else {
            ProxyError::UpstreamRequest(err.to_string())
        }
    }
}

/// Reasons a forwarded sync call did not become a tracking event
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Malformed sync payload: {0}")]
    MalformedEvent(String),

    #[error("User {0} not found in library")]
    UnknownUser(String),

    #[error("Book with hash {0} not found in library")]
    UnknownBook(String),

    #[error("Library lookup failed: {0}")]
    Directory(#[from] sqlx::Error),
}

/// Persistence failure reported by a session store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session rejected by store: {0}")]
    Rejected(String),
}

/// Errors surfaced by the session tracker
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("{} session(s) could not be persisted during shutdown", failed.len())]
    ShutdownFlushFailed { failed: Vec<SessionKey> },
}

/// Invalid configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] EnvParseError),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
