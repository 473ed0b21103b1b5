//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for identifiers and validated values. Each newtype
//! checks its invariants at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// StableId
// ============================================================================

/// Client-side idempotency key for a media asset
///
/// Either a platform-local identifier or a content hash. It is stable across
/// restarts and is the key shared by dedup lookups, upload sessions and
/// progress records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StableId(String);

impl StableId {
    /// Creates a new StableId, rejecting empty or whitespace-only values
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidStableId(value));
        }
        if value.chars().any(char::is_control) {
            return Err(DomainError::InvalidStableId(format!(
                "contains control characters: {value:?}"
            )));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for StableId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StableId> for String {
    fn from(id: StableId) -> Self {
        id.0
    }
}

impl AsRef<str> for StableId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Identifier of a persisted upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a SessionId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

// ============================================================================
// ServerEndpoint
// ============================================================================

/// The `(server host, api key)` pair that scopes uploads and catalog requests
///
/// Two endpoints are "the same server identity" only when both the
/// scheme+host origin and the key are string-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    host: String,
    api_key: String,
}

impl ServerEndpoint {
    /// Creates an endpoint from a base URL such as `https://photos.example.com`
    ///
    /// A trailing slash is dropped. Only `http` and `https` are accepted and
    /// the key must not be empty.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Result<Self, DomainError> {
        let host = host.into().trim().trim_end_matches('/').to_string();
        let api_key = api_key.into().trim().to_string();

        let parsed = Url::parse(&host)
            .map_err(|e| DomainError::InvalidEndpoint(format!("{host}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(DomainError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(DomainError::InvalidEndpoint(format!("{host}: missing host")));
        }
        if api_key.is_empty() {
            return Err(DomainError::InvalidEndpoint("api key is empty".to_string()));
        }

        Ok(Self { host, api_key })
    }

    /// The configured base URL, without trailing slash
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Scheme + host (+ port) of the base URL, e.g. `https://photos.example.com:8443`
    pub fn origin(&self) -> String {
        origin_of(&self.host).unwrap_or_else(|| self.host.clone())
    }

    /// Value of the `Authorization` header used for uploads
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Extracts the scheme+host(+port) origin of a URL string
///
/// Returns `None` when the string is not an absolute URL.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str()?;
    Some(parsed.origin().ascii_serialization())
}

// ============================================================================
// SyncWatermark
// ============================================================================

/// Creation-time boundary below which all assets are assumed synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncWatermark(DateTime<Utc>);

impl SyncWatermark {
    /// The Unix epoch, used for a first sync and for full re-scans
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::from(std::time::UNIX_EPOCH))
    }

    pub const fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Moves the watermark forward to `candidate` if it is later
    ///
    /// Returns `true` when the watermark changed. The watermark never moves
    /// backwards.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.0 {
            self.0 = candidate;
            true
        } else {
            false
        }
    }
}

impl Default for SyncWatermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl Display for SyncWatermark {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
