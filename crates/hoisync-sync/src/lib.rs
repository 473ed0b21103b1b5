//! HoiSync Sync - Discovery, dedup and resumable uploads
//!
//! Provides:
//! - Batched discovery of new local media above a watermark
//! - Deduplication against the server catalog
//! - A bounded pool of resumable (tus) uploads that survive restarts
//! - Persisted per-item progress
//!
//! ## Modules
//!
//! - [`coordinator`] - The sync state machine driven by an external trigger
//! - [`transport`] - Chunked upload session manager
//! - [`progress`] - Upload/download progress maps
//! - [`filesystem`] - Directory-backed asset source
//! - [`media`] - Local and remote media capability variants
//! - [`housekeeping`] - Temporary directory cleanup
//! - [`lease`] - Run lease shared by every process using one state database
//! - [`retry`] - Exponential backoff for transient failures
//! - [`wakeup`] - One bounded run: resume, discover, drain, prune

pub mod coordinator;
pub mod filesystem;
pub mod housekeeping;
pub mod lease;
pub mod media;
pub mod progress;
pub mod retry;
pub mod transport;
pub mod wakeup;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file behind an upload session no longer exists
    #[error("Source file missing: {0}")]
    SourceMissing(PathBuf),

    /// The server rejected or failed a request
    #[error("API error: {0}")]
    ApiError(#[from] hoisync_api::ApiError),

    /// The transfer was stopped by the expiration signal
    #[error("Cancelled")]
    Cancelled,

    /// A domain-level error propagated from hoisync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] hoisync_core::domain::DomainError),
}

impl SyncError {
    /// Whether a later attempt of the same step may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::ApiError(e) => e.is_transient(),
            SyncError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
