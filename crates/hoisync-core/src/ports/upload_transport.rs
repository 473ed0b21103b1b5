//! Upload transport port
//!
//! The coordinator only needs three things from the transport: hand-off,
//! recovery of failed sessions, and a backpressure count.

use crate::domain::{SessionId, UploadItem};

/// What `retry_failed_uploads` did with each failed session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Sessions validated against the current endpoint and restarted
    pub retried: Vec<SessionId>,
    /// Sessions created for another host or key, cancelled and removed
    pub cancelled: Vec<SessionId>,
    /// Rows that could not be decoded and were removed
    pub corrupt_removed: usize,
}

/// Port trait for resumable uploads
#[async_trait::async_trait]
pub trait IUploadTransport: Send + Sync {
    /// Persists a new session for `item` and starts transferring it
    ///
    /// Returns once the session is durable; the transfer continues in the
    /// background. The caller must have ruled out duplicates.
    async fn enqueue(&self, item: UploadItem) -> anyhow::Result<SessionId>;

    /// Retries failed sessions that belong to the current endpoint and
    /// cancels the others
    async fn retry_failed_uploads(&self) -> anyhow::Result<RetryReport>;

    /// Number of sessions still queued or transferring
    async fn remaining_uploads(&self) -> anyhow::Result<usize>;
}
