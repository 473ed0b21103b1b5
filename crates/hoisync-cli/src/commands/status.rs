//! Status command - Display sync and upload progress
//!
//! Provides the `hoisync status` CLI command which shows:
//! 1. Whether background sync is enabled and which server it targets
//! 2. The sync watermark (creation time of the last processed asset)
//! 3. Upload and download progress summaries
//! 4. Unfinished sessions with their fraction uploaded
//! 5. Failed sessions with the error that stopped them

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use hoisync_core::domain::{UploadSession, UploadStatus};
use hoisync_core::ports::{ISessionStore, ISettingsStore, SessionFilter, StoredSession};
use hoisync_sync::progress::{ProgressTracker, DOWNLOADS_TRACKER, UPLOADS_TRACKER};

use super::{load_config, LocalState};
use crate::output::{get_formatter, percent, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Also list every unfinished upload
    #[arg(long)]
    pub all: bool,
}

/// Everything `status` reports, gathered before rendering
struct StatusSnapshot {
    server: Option<String>,
    sync_enabled: bool,
    watermark: Option<DateTime<Utc>>,
    uploads: ProgressSummary,
    downloads: ProgressSummary,
    unfinished: Vec<UploadSession>,
    failed: Vec<UploadSession>,
    corrupt: usize,
}

struct ProgressSummary {
    summary: String,
    tracked: usize,
    overall_rate: f64,
}

impl ProgressSummary {
    fn of(tracker: &ProgressTracker) -> Self {
        Self {
            summary: tracker.summary(),
            tracked: tracker.len(),
            overall_rate: tracker.overall_rate(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "summary": self.summary,
            "tracked": self.tracked,
            "overall_rate": self.overall_rate,
        })
    }
}

impl StatusCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;
        let state = LocalState::open(&config).await?;

        let snapshot = gather(&state, config.endpoint().ok().map(|e| e.host().to_string())).await?;

        if format.is_json() {
            formatter.print_json(&snapshot_json(&snapshot));
        } else {
            self.print_human(&snapshot, &*formatter);
        }
        Ok(())
    }

    fn print_human(&self, snapshot: &StatusSnapshot, formatter: &dyn OutputFormatter) {
        formatter.success(&format!(
            "HoiSync Status - {}",
            snapshot.server.as_deref().unwrap_or("no server configured")
        ));
        formatter.info("");
        formatter.info(&format!(
            "Background sync: {}",
            if snapshot.sync_enabled { "enabled" } else { "disabled" }
        ));
        match snapshot.watermark {
            Some(time) => formatter.info(&format!(
                "Synced up to: {}",
                time.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            None => formatter.info("Synced up to: Never"),
        }
        formatter.info(&format!(
            "Uploads: {} ({})",
            snapshot.uploads.summary,
            percent(snapshot.uploads.overall_rate)
        ));
        if snapshot.downloads.tracked > 0 {
            formatter.info(&format!(
                "Downloads: {} ({})",
                snapshot.downloads.summary,
                percent(snapshot.downloads.overall_rate)
            ));
        }
        formatter.info(&format!("Unfinished uploads: {}", snapshot.unfinished.len()));

        if self.all && !snapshot.unfinished.is_empty() {
            formatter.info("");
            for session in &snapshot.unfinished {
                formatter.info(&format!(
                    "  {}  {:<10} {:>4}  {}",
                    session.id(),
                    session.status(),
                    percent(session.fraction()),
                    session.filename()
                ));
            }
        }

        if !snapshot.failed.is_empty() {
            formatter.info("");
            formatter.warn(&format!("{} failed upload(s):", snapshot.failed.len()));
            for session in &snapshot.failed {
                formatter.info(&format!(
                    "  {}  {}: {}",
                    session.id(),
                    session.filename(),
                    session.last_error().unwrap_or("unknown error")
                ));
            }
            formatter.info("");
            formatter.info("Run 'hoisync retry' to upload them again.");
        }

        if snapshot.corrupt > 0 {
            formatter.warn(&format!(
                "{} unreadable upload record(s); 'hoisync retry' removes them",
                snapshot.corrupt
            ));
        }
    }
}

async fn gather(state: &LocalState, server: Option<String>) -> Result<StatusSnapshot> {
    let repo = &state.repo;
    let sync_enabled = repo
        .is_sync_enabled()
        .await
        .context("Failed to read sync setting")?;
    let watermark = repo
        .get_watermark()
        .await
        .context("Failed to read sync watermark")?;

    let uploads = ProgressTracker::load(UPLOADS_TRACKER, repo.clone()).await;
    let downloads = ProgressTracker::load(DOWNLOADS_TRACKER, repo.clone()).await;

    let mut unfinished = Vec::new();
    let mut failed = Vec::new();
    let mut corrupt = 0;
    for stored in repo
        .list_sessions(&SessionFilter::new())
        .await
        .context("Failed to list upload sessions")?
    {
        match stored {
            StoredSession::Valid(session) => match session.status() {
                UploadStatus::Pending | UploadStatus::Uploading => unfinished.push(session),
                UploadStatus::Failed => failed.push(session),
                UploadStatus::Completed => {}
            },
            StoredSession::Corrupt { .. } => corrupt += 1,
        }
    }

    Ok(StatusSnapshot {
        server,
        sync_enabled,
        watermark,
        uploads: ProgressSummary::of(&uploads),
        downloads: ProgressSummary::of(&downloads),
        unfinished,
        failed,
        corrupt,
    })
}

fn session_json(session: &UploadSession) -> serde_json::Value {
    serde_json::json!({
        "id": session.id().to_string(),
        "stable_id": session.stable_id().as_str(),
        "filename": session.filename(),
        "status": session.status().as_str(),
        "bytes_uploaded": session.bytes_uploaded(),
        "total_bytes": session.total_bytes(),
        "last_error": session.last_error(),
        "updated_at": session.updated_at().to_rfc3339(),
    })
}

fn snapshot_json(snapshot: &StatusSnapshot) -> serde_json::Value {
    serde_json::json!({
        "server": snapshot.server,
        "sync_enabled": snapshot.sync_enabled,
        "watermark": snapshot.watermark.map(|t| t.to_rfc3339()),
        "uploads": snapshot.uploads.to_json(),
        "downloads": snapshot.downloads.to_json(),
        "uploads_remaining": snapshot.unfinished.len(),
        "unfinished": snapshot.unfinished.iter().map(session_json).collect::<Vec<_>>(),
        "failed": snapshot.failed.iter().map(session_json).collect::<Vec<_>>(),
        "corrupt_sessions": snapshot.corrupt,
    })
}
