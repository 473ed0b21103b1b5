//! Upload items and persisted upload sessions
//!
//! An [`UploadItem`] is the ephemeral hand-off value from the coordinator to
//! the transport. An [`UploadSession`] is the transport's durable record of
//! one resumable transfer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{origin_of, ServerEndpoint, SessionId, StableId};

/// Header carrying the bearer token
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Header carrying the serialized tus metadata
pub const UPLOAD_METADATA_HEADER: &str = "Upload-Metadata";

// ============================================================================
// UploadItem
// ============================================================================

/// One pending transfer, owned by the transport once enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub stable_id: StableId,
    /// Readable local location of the media
    pub source: PathBuf,
    pub filename: String,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: Option<Vec<String>>,
}

impl UploadItem {
    /// Creates an item whose filename is the last component of `source`
    pub fn new(stable_id: StableId, source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let filename = filename_of(&source);
        Self {
            stable_id,
            source,
            filename,
            created_at: None,
            labels: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Key/value pairs sent as tus upload metadata
    ///
    /// Always contains `itemId` and `filename`; `created` (ISO-8601) and
    /// `labels` (comma-joined) only when known.
    pub fn upload_metadata(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("itemId".to_string(), self.stable_id.as_str().to_string()),
            ("filename".to_string(), self.filename.clone()),
        ];
        if let Some(created) = self.created_at {
            pairs.push((
                "created".to_string(),
                created.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(labels) = self.labels.as_ref().filter(|l| !l.is_empty()) {
            pairs.push(("labels".to_string(), labels.join(",")));
        }
        pairs
    }
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// ============================================================================
// UploadStatus
// ============================================================================

/// Lifecycle state of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Persisted, transfer not started
    Pending,
    /// Creation or chunk transfer in progress
    Uploading,
    Completed,
    /// Internal retries exhausted
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    /// Pending and uploading sessions occupy upload capacity; failed ones
    /// wait for an explicit retry
    pub fn is_remaining(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown upload status '{other}'"
            ))),
        }
    }
}

// ============================================================================
// UploadSession
// ============================================================================

/// Durable state of one resumable upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    id: SessionId,
    stable_id: StableId,
    filename: String,
    source_path: PathBuf,
    /// Scheme+host the session was created for
    endpoint_origin: String,
    /// Server-assigned location, known once creation succeeded
    upload_url: Option<String>,
    custom_headers: BTreeMap<String, String>,
    bytes_uploaded: u64,
    total_bytes: u64,
    status: UploadStatus,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates a pending session for `item` against `endpoint`
    ///
    /// `metadata_header` is the already-encoded `Upload-Metadata` value.
    pub fn new(
        item: &UploadItem,
        endpoint: &ServerEndpoint,
        metadata_header: String,
        total_bytes: u64,
    ) -> Self {
        let mut custom_headers = BTreeMap::new();
        custom_headers.insert(AUTHORIZATION_HEADER.to_string(), endpoint.bearer_header());
        custom_headers.insert(UPLOAD_METADATA_HEADER.to_string(), metadata_header);

        let now = Utc::now();
        Self {
            id: SessionId::new(),
            stable_id: item.stable_id.clone(),
            filename: item.filename.clone(),
            source_path: item.source.clone(),
            endpoint_origin: endpoint.origin(),
            upload_url: None,
            custom_headers,
            bytes_uploaded: 0,
            total_bytes,
            status: UploadStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    // --- accessors ---

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn stable_id(&self) -> &StableId {
        &self.stable_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn endpoint_origin(&self) -> &str {
        &self.endpoint_origin
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    pub fn custom_headers(&self) -> &BTreeMap<String, String> {
        &self.custom_headers
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fraction uploaded, 1.0 for empty files
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes_uploaded as f64 / self.total_bytes as f64).min(1.0)
        }
    }

    /// Token from the stored `Authorization: Bearer <token>` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.custom_headers
            .get(AUTHORIZATION_HEADER)
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Whether this session was created for exactly this server identity
    ///
    /// Compares the scheme+host origin and the bearer token as exact strings.
    /// If an upload URL is known, its origin must match too.
    pub fn belongs_to(&self, endpoint: &ServerEndpoint) -> bool {
        let origin = endpoint.origin();
        if self.endpoint_origin != origin {
            return false;
        }
        if let Some(url) = &self.upload_url {
            if origin_of(url).as_deref() != Some(origin.as_str()) {
                return false;
            }
        }
        self.bearer_token() == Some(endpoint.api_key())
    }

    // --- transitions ---

    /// Records the server-assigned upload location
    pub fn set_upload_url(&mut self, url: impl Into<String>) {
        self.upload_url = Some(url.into());
        self.touch();
    }

    /// Pending (or interrupted uploading) -> Uploading
    pub fn start_uploading(&mut self) -> Result<(), DomainError> {
        match self.status {
            UploadStatus::Pending | UploadStatus::Uploading => {
                self.status = UploadStatus::Uploading;
                self.touch();
                Ok(())
            }
            other => Err(self.invalid(other, UploadStatus::Uploading)),
        }
    }

    /// Records the server-acknowledged offset
    pub fn record_progress(&mut self, bytes_uploaded: u64) -> Result<(), DomainError> {
        if self.status != UploadStatus::Uploading {
            return Err(self.invalid(self.status, UploadStatus::Uploading));
        }
        self.bytes_uploaded = bytes_uploaded.min(self.total_bytes);
        self.touch();
        Ok(())
    }

    /// Uploading -> Completed
    pub fn complete(&mut self) -> Result<(), DomainError> {
        if self.status != UploadStatus::Uploading {
            return Err(self.invalid(self.status, UploadStatus::Completed));
        }
        self.status = UploadStatus::Completed;
        self.bytes_uploaded = self.total_bytes;
        self.last_error = None;
        self.touch();
        Ok(())
    }

    /// Pending/Uploading -> Failed
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        match self.status {
            UploadStatus::Pending | UploadStatus::Uploading => {
                self.status = UploadStatus::Failed;
                self.last_error = Some(reason.into());
                self.touch();
                Ok(())
            }
            other => Err(self.invalid(other, UploadStatus::Failed)),
        }
    }

    /// Failed -> Pending, keeping the upload URL so the transfer resumes
    pub fn reset_for_retry(&mut self) -> Result<(), DomainError> {
        if self.status != UploadStatus::Failed {
            return Err(self.invalid(self.status, UploadStatus::Pending));
        }
        self.status = UploadStatus::Pending;
        self.last_error = None;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, from: UploadStatus, to: UploadStatus) -> DomainError {
        DomainError::InvalidState {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
