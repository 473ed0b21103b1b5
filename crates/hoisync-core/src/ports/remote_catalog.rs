//! Remote catalog port (driven/secondary port)
//!
//! ## Design Notes
//!
//! - Lookups return [`CatalogLookup`] instead of `Option` so that a failed
//!   request is never mistaken for "not uploaded yet".
//! - The catalog does not retry; retry policy belongs to the caller.

use crate::domain::{CatalogLookup, LabelIndex, RemoteMetadataRecord, StableId};

/// HTTP status plus the server's `message` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: u16,
    pub message: String,
}

impl StatusMessage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Port trait for server-side metadata
#[async_trait::async_trait]
pub trait IRemoteCatalog: Send + Sync {
    /// True only on HTTP 200 with a well-formed body; never errors
    async fn health_check(&self) -> bool;

    /// Looks up a record by the client-supplied stable id
    async fn get_by_item_id(&self, item_id: &StableId) -> CatalogLookup;

    /// Looks up a record by its numeric server id
    async fn get_by_id(&self, id: i64) -> CatalogLookup;

    /// Looks up a record by its server-assigned filekey
    async fn get_by_filekey(&self, filekey: &str) -> CatalogLookup;

    /// All records visible to the api key
    async fn list_metadata(&self) -> anyhow::Result<Vec<RemoteMetadataRecord>>;

    /// Every label visible to the api key, grouped by metadata record id
    async fn list_labels(&self) -> anyhow::Result<LabelIndex>;

    /// Deletes a stored file; the caller decides whether the status is success
    async fn delete_record(&self, id: i64) -> anyhow::Result<StatusMessage>;

    /// Attaches labels to the record of `item_id`
    async fn upload_labels(
        &self,
        item_id: &StableId,
        labels: &[String],
    ) -> anyhow::Result<StatusMessage>;
}
