//! HoiSync API - Backup server HTTP clients
//!
//! Provides async clients for:
//! - Metadata lookups, listing, deletion and labels
//! - Thumbnail and full-file downloads
//! - The tus 1.0.0 resumable upload protocol
//!
//! ## Modules
//!
//! - [`client`] - [`StorageClient`], the `IRemoteCatalog` adapter
//! - [`tus`] - Creation, offset probe, chunk transfer and termination

pub mod client;
pub mod tus;

pub use client::StorageClient;
pub use tus::TusClient;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when talking to the backup server
#[derive(Debug, Error)]
pub enum ApiError {
    /// Host or api key missing; no request was sent
    #[error("Server is not configured")]
    NotConfigured,

    /// The api key was rejected (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upload offset did not match the server's; re-probe, don't retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Any other non-success status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A URL could not be built from the configured host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Maps a non-success status and body text to an error
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
            StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::NotFound(message),
            StatusCode::CONFLICT => ApiError::Conflict(message),
            s if s.is_server_error() => ApiError::ServerError(format!("{}: {}", s, message)),
            s => ApiError::UnexpectedStatus {
                status: s.as_u16(),
                message,
            },
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::NetworkError(_) | ApiError::ServerError(_) => true,
            ApiError::UnexpectedStatus { status, .. } => *status == 408 || *status == 429,
            _ => false,
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::InvalidUrl(e.to_string())
    }
}
