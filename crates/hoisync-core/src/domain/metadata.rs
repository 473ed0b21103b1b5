//! Server-side metadata records
//!
//! The server owns these records; the sync engine only reads them to decide
//! whether an asset is already uploaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::asset::MediaKind;

/// The server's canonical record for an uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetadataRecord {
    /// Numeric primary key
    pub id: i64,
    /// Client-supplied stable id
    pub item_id: String,
    /// Server-assigned storage key, absent while processing
    pub filekey: Option<String>,
    pub filename: String,
    pub filesize: i64,
    pub mime_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Seconds, videos only
    pub duration: Option<f32>,
    pub altitude: Option<f32>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    /// ISO-8601 creation timestamp
    pub created: Option<String>,
    /// ISO-8601 upload timestamp
    pub uploaded: Option<String>,
}

/// A label the server attached to a metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLabel {
    pub id: i64,
    pub metadata_id: i64,
    pub user_id: i64,
    pub labelname: String,
}

/// Label names per metadata record id, in server order
pub type LabelIndex = BTreeMap<i64, Vec<String>>;

/// Groups server labels by the record they are attached to
pub fn index_labels(labels: impl IntoIterator<Item = MetadataLabel>) -> LabelIndex {
    let mut index = LabelIndex::new();
    for label in labels {
        index.entry(label.metadata_id).or_default().push(label.labelname);
    }
    index
}

/// Result of a catalog existence lookup
///
/// `NotFound` and `TransientError` are distinct on purpose: only a definite
/// `NotFound` allows the caller to upload, a transient failure means "ask
/// again later".
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLookup {
    /// The server has a record
    Found(Box<RemoteMetadataRecord>),
    /// The server answered and has no record
    NotFound,
    /// The request failed or the answer could not be decoded
    TransientError(String),
}

impl CatalogLookup {
    pub fn is_found(&self) -> bool {
        matches!(self, CatalogLookup::Found(_))
    }

    pub fn record(&self) -> Option<&RemoteMetadataRecord> {
        match self {
            CatalogLookup::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<RemoteMetadataRecord> {
        match self {
            CatalogLookup::Found(record) => Some(*record),
            _ => None,
        }
    }
}

/// MIME type the server expects for a file of the given kind
pub fn mime_type_for(filename: &str, kind: MediaKind) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    match kind {
        MediaKind::Image => {
            if lower.ends_with(".png") {
                "image/png"
            } else if lower.ends_with(".gif") {
                "image/gif"
            } else if lower.ends_with(".heic") {
                "image/heic"
            } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
                "image/jpeg"
            } else {
                "image/unknown"
            }
        }
        MediaKind::Video => "video/mp4",
        MediaKind::Audio => "audio/mp4",
        MediaKind::Other => "application/octet-stream",
    }
}
