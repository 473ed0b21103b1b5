//! Asset source port (driving collaborator)
//!
//! The platform media library is outside this workspace. Hosts provide an
//! implementation; `hoisync-sync` ships a directory-backed one.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::domain::{AssetDescriptor, AuthorizationStatus, StableId};

/// Port trait for enumerating local media
#[async_trait::async_trait]
pub trait IAssetSource: Send + Sync {
    /// Asks for library access; may wait indefinitely on user consent
    async fn request_authorization(&self) -> AuthorizationStatus;

    /// Assets created strictly after `since`, ascending by creation time,
    /// at most `limit` entries
    ///
    /// Sources may return more than `limit` when several assets share the
    /// creation time of the last one, since a later call starting at that
    /// time would never see them.
    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<AssetDescriptor>>;

    /// Resolves an asset to a readable local file
    ///
    /// `None` when the asset is gone or cannot be materialized.
    async fn resolve_url(&self, stable_id: &StableId) -> Option<PathBuf>;
}
