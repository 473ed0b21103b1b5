//! One wake-up of the engine
//!
//! A wake-up is what the host grants the engine: some time, bounded by an
//! expiration token. [`run_wakeup`] takes the run lease on the state
//! database, then spends the time on
//!
//! 1. cleaning the temporary directory,
//! 2. resuming interrupted sessions and retrying failed ones,
//! 3. running the coordinator,
//! 4. letting started uploads finish or pause at a chunk boundary,
//! 5. pruning completed sessions and saving progress.
//!
//! The daemon calls it on every tick; the CLI calls it for "sync now".

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hoisync_api::StorageClient;
use hoisync_core::config::Config;
use hoisync_core::ports::{ISessionStore, ISettingsStore, IUploadTransport};

use crate::coordinator::{SyncCoordinator, SyncOutcome, SyncReport};
use crate::filesystem::DirectoryAssetSource;
use crate::housekeeping::clean_temporary_directory;
use crate::lease::{RunLease, LEASE_TTL};
use crate::progress::ProgressTracker;
use crate::transport::{ChunkedUploadTransport, TransportSettings};

/// Long-lived state shared by every wake-up
#[derive(Clone)]
pub struct WakeupServices {
    pub settings: Arc<dyn ISettingsStore>,
    pub sessions: Arc<dyn ISessionStore>,
    pub uploads: Arc<ProgressTracker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupMode {
    /// Discover assets above the watermark
    Incremental,
    /// Reset the watermark first
    FullRescan,
}

/// What a wake-up did
#[derive(Debug, Clone, Default, Serialize)]
pub struct WakeupSummary {
    pub report: SyncReport,
    /// Stored sessions resumed or retried when the transport opened
    pub resumed: usize,
    /// Stored sessions dropped because they belong to another server identity
    pub cancelled_sessions: usize,
    pub pruned: usize,
    pub temp_files_removed: usize,
    /// Sessions still pending or uploading when the wake-up ended
    pub uploads_remaining: usize,
}

/// Runs one wake-up until the work is done or `expiration` fires
///
/// When another wake-up sharing the same state database is in progress,
/// returns at once with [`SyncOutcome::AlreadyRunning`].
#[tracing::instrument(skip(config, services, expiration))]
pub async fn run_wakeup(
    config: &Config,
    services: &WakeupServices,
    mode: WakeupMode,
    expiration: &CancellationToken,
) -> anyhow::Result<WakeupSummary> {
    let Some(lease) = RunLease::acquire(Arc::clone(&services.settings), LEASE_TTL)
        .await
        .context("Failed to take the run lease")?
    else {
        info!("Another wake-up is in progress, skipping");
        return Ok(WakeupSummary {
            report: SyncReport {
                outcome: SyncOutcome::AlreadyRunning,
                ..SyncReport::default()
            },
            ..WakeupSummary::default()
        });
    };

    let result = run_leased(config, services, mode, expiration).await;
    lease.release().await;
    result
}

async fn run_leased(
    config: &Config,
    services: &WakeupServices,
    mode: WakeupMode,
    expiration: &CancellationToken,
) -> anyhow::Result<WakeupSummary> {
    let mut summary = WakeupSummary::default();

    if config.storage.temp_dir_overlaps_source() {
        warn!(
            temp_dir = %config.storage.temp_dir.display(),
            source_dir = %config.storage.source_dir.display(),
            "Temporary directory overlaps the source directory, skipping cleanup"
        );
    } else {
        match clean_temporary_directory(
            &config.storage.temp_dir,
            config.storage.temp_retention_days,
        )
        .await
        {
            Ok(removed) => summary.temp_files_removed = removed,
            Err(e) => warn!(error = %e, "Temporary directory cleanup failed"),
        }
    }

    let endpoint = config.endpoint().context("Server is not configured")?;
    let transport = ChunkedUploadTransport::new(
        endpoint.clone(),
        Arc::clone(&services.sessions),
        Arc::clone(&services.uploads),
        TransportSettings::from_config(&config.upload),
        expiration.clone(),
    )
    .context("Failed to create upload transport")?;
    let resumed = transport.resume_pending().await?;
    let retried = transport.retry_failed_uploads().await?;
    summary.resumed = resumed.retried.len() + retried.retried.len();
    summary.cancelled_sessions = resumed.cancelled.len() + retried.cancelled.len();

    let coordinator = SyncCoordinator::new(
        Arc::new(DirectoryAssetSource::new(&config.storage.source_dir)),
        Arc::new(StorageClient::from_endpoint(&endpoint)),
        Arc::new(transport.clone()),
        Arc::clone(&services.settings),
        config.sync.clone(),
    );
    summary.report = match mode {
        WakeupMode::Incremental => coordinator.start(expiration).await?,
        WakeupMode::FullRescan => coordinator.start_again(expiration).await?,
    };

    tokio::select! {
        _ = transport.wait_idle() => {}
        _ = expiration.cancelled() => {
            debug!("Expiration reached, waiting for uploads to pause");
            transport.wait_idle().await;
        }
    }

    summary.pruned = transport.prune_completed().await?;
    summary.uploads_remaining = transport.remaining_uploads().await?;
    if let Err(e) = services.uploads.save().await {
        warn!(error = %e, "Failed to save upload progress");
    }

    info!(
        outcome = ?summary.report.outcome,
        enqueued = summary.report.enqueued,
        resumed = summary.resumed,
        pruned = summary.pruned,
        uploads_remaining = summary.uploads_remaining,
        "Wake-up finished"
    );
    Ok(summary)
}
