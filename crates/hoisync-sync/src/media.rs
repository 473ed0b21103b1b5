//! Media capability variants
//!
//! [`LocalAsset`] is a file in the local library, [`RemoteAsset`] a record
//! on the server. Both implement [`IMediaSource`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use url::Url;

use hoisync_api::StorageClient;
use hoisync_core::domain::{mime_type_for, MediaKind, RemoteMetadataRecord};
use hoisync_core::ports::IMediaSource;

use crate::progress::ProgressTracker;

// ============================================================================
// LocalAsset
// ============================================================================

/// A media file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    path: PathBuf,
    kind: MediaKind,
}

impl LocalAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = path
            .file_name()
            .map(|n| MediaKind::from_filename(&n.to_string_lossy()))
            .unwrap_or(MediaKind::Other);
        Self { path, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

#[async_trait::async_trait]
impl IMediaSource for LocalAsset {
    /// Images are their own preview; videos have none locally
    async fn thumbnail(&self) -> anyhow::Result<Vec<u8>> {
        if self.kind != MediaKind::Image {
            bail!("No local preview for {}", self.path.display());
        }
        self.full_media().await
    }

    async fn full_media(&self) -> anyhow::Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn video_url(&self) -> Option<Url> {
        if self.kind != MediaKind::Video {
            return None;
        }
        Url::from_file_path(&self.path).ok()
    }

    fn mime_type(&self) -> String {
        let filename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        mime_type_for(&filename, self.kind).to_string()
    }
}

// ============================================================================
// RemoteAsset
// ============================================================================

/// A file stored on the server, addressed by its filekey
pub struct RemoteAsset {
    client: Arc<StorageClient>,
    record: RemoteMetadataRecord,
    downloads: Option<Arc<ProgressTracker>>,
}

impl RemoteAsset {
    pub fn new(client: Arc<StorageClient>, record: RemoteMetadataRecord) -> Self {
        Self {
            client,
            record,
            downloads: None,
        }
    }

    /// Reports full downloads in `tracker`, keyed by filekey
    pub fn with_download_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.downloads = Some(tracker);
        self
    }

    pub fn record(&self) -> &RemoteMetadataRecord {
        &self.record
    }

    pub fn kind(&self) -> MediaKind {
        if self.record.mime_type.starts_with("video/") {
            MediaKind::Video
        } else if self.record.mime_type.starts_with("image/") {
            MediaKind::Image
        } else {
            MediaKind::from_filename(&self.record.filename)
        }
    }

    fn filekey(&self) -> anyhow::Result<&str> {
        match self.record.filekey.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("Record {} has no stored file yet", self.record.id),
        }
    }
}

#[async_trait::async_trait]
impl IMediaSource for RemoteAsset {
    async fn thumbnail(&self) -> anyhow::Result<Vec<u8>> {
        let filekey = self.filekey()?;
        Ok(self.client.download_thumbnail(filekey).await?)
    }

    async fn full_media(&self) -> anyhow::Result<Vec<u8>> {
        let filekey = self.filekey()?;
        if let Some(tracker) = &self.downloads {
            tracker.start(filekey);
        }
        match self.client.download_file(filekey).await {
            Ok(bytes) => {
                if let Some(tracker) = &self.downloads {
                    tracker.complete(filekey);
                }
                Ok(bytes)
            }
            Err(e) => {
                if let Some(tracker) = &self.downloads {
                    tracker.remove(filekey);
                }
                Err(e.into())
            }
        }
    }

    fn video_url(&self) -> Option<Url> {
        if self.kind() != MediaKind::Video {
            return None;
        }
        self.client.file_url(self.filekey().ok()?).ok()
    }

    /// The server's type, or one derived from the filename when it sent none
    fn mime_type(&self) -> String {
        if self.record.mime_type.is_empty() {
            mime_type_for(&self.record.filename, self.kind()).to_string()
        } else {
            self.record.mime_type.clone()
        }
    }
}
