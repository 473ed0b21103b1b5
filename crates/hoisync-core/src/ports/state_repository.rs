//! State repository ports (driven/secondary ports)
//!
//! Durable storage for the sync watermark, the enable flag, progress maps
//! and upload sessions.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, files, ...) and don't need domain-level classification.
//! - Progress maps are stored as opaque JSON snapshots so the tracker, not
//!   the store, decides how to recover from corrupt data.
//! - Session listing surfaces undecodable rows as [`StoredSession::Corrupt`]
//!   instead of failing the whole query.

use chrono::{DateTime, Utc};

use crate::domain::{SessionId, UploadSession, UploadStatus};

// ============================================================================
// Settings
// ============================================================================

/// Port trait for the single-value sync settings
#[async_trait::async_trait]
pub trait ISettingsStore: Send + Sync {
    /// The persisted watermark, `None` before the first sync
    async fn get_watermark(&self) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn set_watermark(&self, value: DateTime<Utc>) -> anyhow::Result<()>;

    /// The persisted enable flag, `false` when never set
    async fn is_sync_enabled(&self) -> anyhow::Result<bool>;

    async fn set_sync_enabled(&self, enabled: bool) -> anyhow::Result<()>;

    /// Takes or renews the run lease for `owner` until `expires_at`
    ///
    /// Returns `false` while another owner holds an unexpired lease. The
    /// check and the write happen atomically so that two processes sharing
    /// the store cannot both win.
    async fn try_acquire_run_lease(
        &self,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Drops the run lease if `owner` holds it
    async fn release_run_lease(&self, owner: &str) -> anyhow::Result<()>;
}

// ============================================================================
// Progress
// ============================================================================

/// Port trait for progress map snapshots, keyed by tracker name
#[async_trait::async_trait]
pub trait IProgressStore: Send + Sync {
    /// Loads the last saved snapshot for `tracker`
    async fn load_progress(&self, tracker: &str) -> anyhow::Result<Option<String>>;

    /// Replaces the snapshot for `tracker`
    async fn save_progress(&self, tracker: &str, snapshot: &str) -> anyhow::Result<()>;
}

// ============================================================================
// Upload sessions
// ============================================================================

/// Filter for listing sessions
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Only sessions in one of these states (all when empty)
    pub statuses: Vec<UploadStatus>,
}

impl SessionFilter {
    /// Matches every session
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: UploadStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, status: UploadStatus) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status)
    }
}

/// A row read back from the session store
#[derive(Debug, Clone)]
pub enum StoredSession {
    Valid(UploadSession),
    /// A row that exists but cannot be decoded
    Corrupt {
        /// Raw id column
        id: String,
        reason: String,
    },
}

/// Port trait for upload session persistence
#[async_trait::async_trait]
pub trait ISessionStore: Send + Sync {
    /// Inserts or updates a session
    async fn save_session(&self, session: &UploadSession) -> anyhow::Result<()>;

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<UploadSession>>;

    /// Lists sessions matching `filter`, oldest first
    ///
    /// Corrupt rows are returned regardless of the filter since their status
    /// is unknown.
    async fn list_sessions(&self, filter: &SessionFilter) -> anyhow::Result<Vec<StoredSession>>;

    /// Deletes a session by its raw id; missing ids are not an error
    async fn delete_session(&self, id: &str) -> anyhow::Result<()>;

    /// Number of sessions that are `pending` or `uploading`
    async fn count_remaining(&self) -> anyhow::Result<usize>;
}
