//! HoiSync Cache - Local state persistence
//!
//! SQLite-based storage for:
//! - The sync watermark and enable flag
//! - Upload and download progress snapshots
//! - Resumable upload sessions
//!
//! ## Architecture
//!
//! This crate implements the `ISettingsStore`, `IProgressStore` and
//! `ISessionStore` ports from `hoisync-core` using SQLite as the storage
//! backend. It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use hoisync_cache::{DatabasePool, SqliteStateRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/hoisync/hoisync.db")).await?;
//! let repo = SqliteStateRepository::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
