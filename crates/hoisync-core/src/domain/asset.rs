//! Local media descriptors returned by an asset source

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::StableId;

/// Kind of media an asset holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// Whether the sync engine uploads assets of this kind
    ///
    /// Only photos and videos are backed up.
    pub fn is_syncable(&self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }

    /// Guesses the media kind from a file extension
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "heic" | "heif" | "webp" | "tif" | "tiff"
            | "dng" | "bmp" => MediaKind::Image,
            "mp4" | "mov" | "m4v" | "avi" | "mkv" | "3gp" | "webm" => MediaKind::Video,
            "mp3" | "m4a" | "aac" | "wav" | "flac" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }
}

/// Outcome of asking the asset source for library access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Full library access
    Granted,
    /// Access to a user-selected subset
    Limited,
    Denied,
}

impl AuthorizationStatus {
    /// Both full and limited access allow syncing
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Granted | AuthorizationStatus::Limited
        )
    }
}

/// One enumerated local asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub stable_id: StableId,
    pub created_at: DateTime<Utc>,
    pub media_kind: MediaKind,
    /// Original filename, when the source knows it
    pub filename: Option<String>,
}
