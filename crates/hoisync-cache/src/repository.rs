//! SQLite implementation of the HoiSync state ports
//!
//! ## Type Mapping
//!
//! | Domain Type           | SQL Type | Strategy                                  |
//! |-----------------------|----------|-------------------------------------------|
//! | SessionId             | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | StableId              | TEXT     | String via `.as_str()` / `StableId::new()` |
//! | DateTime<Utc>         | TEXT     | ISO 8601 via `to_rfc3339()`               |
//! | UploadStatus          | TEXT     | `as_str()` / `FromStr`                    |
//! | custom headers        | TEXT     | serde_json object                         |
//! | progress map          | TEXT     | opaque JSON snapshot                      |
//! | sync enabled flag     | TEXT     | `"true"` / `"false"`                      |

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use hoisync_core::domain::{DomainError, SessionId, UploadSession, UploadStatus};
use hoisync_core::ports::{
    IProgressStore, ISessionStore, ISettingsStore, SessionFilter, StoredSession,
};

use crate::CacheError;

const WATERMARK_KEY: &str = "sync_watermark";
const SYNC_ENABLED_KEY: &str = "sync_enabled";
const RUN_LEASE_NAME: &str = "wakeup";

/// SQLite-backed settings, progress and session storage
#[derive(Clone)]
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Fixed-width UTC timestamp so lease expiries compare correctly as text
fn lease_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Reconstruct an UploadSession from a database row
///
/// Goes through serde because the session's fields are private; this also
/// runs the `StableId` and `UploadStatus` validation.
fn session_from_row(row: &SqliteRow) -> Result<UploadSession, CacheError> {
    let read = |e: sqlx::Error| CacheError::SerializationError(e.to_string());

    let id: String = row.try_get("id").map_err(read)?;
    let stable_id: String = row.try_get("stable_id").map_err(read)?;
    let filename: String = row.try_get("filename").map_err(read)?;
    let source_path: String = row.try_get("source_path").map_err(read)?;
    let endpoint_origin: String = row.try_get("endpoint_origin").map_err(read)?;
    let upload_url: Option<String> = row.try_get("upload_url").map_err(read)?;
    let headers_raw: String = row.try_get("custom_headers").map_err(read)?;
    let bytes_uploaded: i64 = row.try_get("bytes_uploaded").map_err(read)?;
    let total_bytes: i64 = row.try_get("total_bytes").map_err(read)?;
    let status_raw: String = row.try_get("status").map_err(read)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(read)?;
    let created_at: String = row.try_get("created_at").map_err(read)?;
    let updated_at: String = row.try_get("updated_at").map_err(read)?;

    let status: UploadStatus = status_raw
        .parse()
        .map_err(|e: DomainError| CacheError::SerializationError(e.to_string()))?;
    let custom_headers: serde_json::Value = serde_json::from_str(&headers_raw).map_err(|e| {
        CacheError::SerializationError(format!("Invalid custom headers: {}", e))
    })?;
    if bytes_uploaded < 0 || total_bytes < 0 {
        return Err(CacheError::SerializationError(format!(
            "Negative byte counts ({bytes_uploaded}/{total_bytes})"
        )));
    }

    let session_json = serde_json::json!({
        "id": id,
        "stable_id": stable_id,
        "filename": filename,
        "source_path": source_path,
        "endpoint_origin": endpoint_origin,
        "upload_url": upload_url,
        "custom_headers": custom_headers,
        "bytes_uploaded": bytes_uploaded,
        "total_bytes": total_bytes,
        "status": status,
        "last_error": last_error,
        "created_at": parse_datetime(&created_at)?,
        "updated_at": parse_datetime(&updated_at)?,
    });

    serde_json::from_value(session_json).map_err(|e| {
        CacheError::SerializationError(format!(
            "Failed to reconstruct UploadSession from row: {}",
            e
        ))
    })
}

fn stored_from_row(row: &SqliteRow) -> StoredSession {
    match session_from_row(row) {
        Ok(session) => StoredSession::Valid(session),
        Err(e) => {
            let id: String = row.try_get("id").unwrap_or_default();
            tracing::warn!(session_id = %id, error = %e, "Corrupt upload session row");
            StoredSession::Corrupt {
                id,
                reason: e.to_string(),
            }
        }
    }
}

// ============================================================================
// ISettingsStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ISettingsStore for SqliteStateRepository {
    async fn get_watermark(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        match self.get_setting(WATERMARK_KEY).await? {
            Some(raw) => Ok(Some(parse_datetime(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_watermark(&self, value: DateTime<Utc>) -> anyhow::Result<()> {
        self.put_setting(WATERMARK_KEY, &value.to_rfc3339()).await?;
        tracing::trace!(watermark = %value, "Saved sync watermark");
        Ok(())
    }

    async fn is_sync_enabled(&self) -> anyhow::Result<bool> {
        Ok(self
            .get_setting(SYNC_ENABLED_KEY)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    async fn set_sync_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.put_setting(SYNC_ENABLED_KEY, if enabled { "true" } else { "false" })
            .await?;
        tracing::debug!(enabled, "Saved sync enabled flag");
        Ok(())
    }

    async fn try_acquire_run_lease(
        &self,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "INSERT INTO run_lease (name, owner, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at \
             WHERE run_lease.owner = excluded.owner OR run_lease.expires_at <= ?",
        )
        .bind(RUN_LEASE_NAME)
        .bind(owner)
        .bind(lease_timestamp(expires_at))
        .bind(lease_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        let acquired = result.rows_affected() > 0;
        tracing::trace!(owner, acquired, "Run lease attempt");
        Ok(acquired)
    }

    async fn release_run_lease(&self, owner: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM run_lease WHERE name = ? AND owner = ?")
            .bind(RUN_LEASE_NAME)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;
        Ok(())
    }
}

// ============================================================================
// IProgressStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IProgressStore for SqliteStateRepository {
    async fn load_progress(&self, tracker: &str) -> anyhow::Result<Option<String>> {
        let snapshot: Option<String> =
            sqlx::query_scalar("SELECT snapshot FROM progress WHERE tracker = ?")
                .bind(tracker)
                .fetch_optional(&self.pool)
                .await?;
        Ok(snapshot)
    }

    async fn save_progress(&self, tracker: &str, snapshot: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO progress (tracker, snapshot, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(tracker) DO UPDATE SET snapshot = excluded.snapshot, \
             updated_at = excluded.updated_at",
        )
        .bind(tracker)
        .bind(snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(tracker, bytes = snapshot.len(), "Saved progress snapshot");
        Ok(())
    }
}

// ============================================================================
// ISessionStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ISessionStore for SqliteStateRepository {
    async fn save_session(&self, session: &UploadSession) -> anyhow::Result<()> {
        let id = session.id().to_string();
        let custom_headers = serde_json::to_string(session.custom_headers())
            .map_err(|e| anyhow::anyhow!("Failed to serialize custom headers: {}", e))?;

        sqlx::query(
            "INSERT OR REPLACE INTO upload_sessions \
             (id, stable_id, filename, source_path, endpoint_origin, upload_url, \
              custom_headers, bytes_uploaded, total_bytes, status, last_error, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session.stable_id().as_str())
        .bind(session.filename())
        .bind(session.source_path().to_string_lossy().into_owned())
        .bind(session.endpoint_origin())
        .bind(session.upload_url())
        .bind(&custom_headers)
        .bind(session.bytes_uploaded() as i64)
        .bind(session.total_bytes() as i64)
        .bind(session.status().as_str())
        .bind(session.last_error())
        .bind(session.created_at().to_rfc3339())
        .bind(session.updated_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(session_id = %id, status = %session.status(), "Saved upload session");
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(session_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> anyhow::Result<Vec<StoredSession>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions ORDER BY created_at ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        let sessions = rows
            .iter()
            .map(stored_from_row)
            .filter(|stored| match stored {
                StoredSession::Valid(session) => filter.matches(session.status()),
                StoredSession::Corrupt { .. } => true,
            })
            .collect();

        Ok(sessions)
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::trace!(session_id = %id, "Deleted upload session");
        Ok(())
    }

    async fn count_remaining(&self) -> anyhow::Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions WHERE status IN ('pending', 'uploading')")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}
