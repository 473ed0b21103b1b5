//! Sync coordinator
//!
//! The [`SyncCoordinator`] turns "new local media" into enqueued uploads.
//! An external trigger (the daemon's wake-up loop, the CLI) calls
//! [`SyncCoordinator::start`] with an expiration token.
//!
//! ## Run flow
//!
//! ```text
//! idle ──(disabled)──→ disabled
//!  │
//!  └──→ discovering ──(denied)──→ idle
//!           │
//!           └──→ waiting-for-capacity ──→ uploading-batch ──(batch empty)──→ idle
//!                      ↑                        │
//!                      └────────────────────────┘
//! ```
//!
//! Per item, sequentially: resolve the asset to a file, look it up in the
//! server catalog by stable id, enqueue it when the server has no record.
//! The watermark candidate advances after each handled item and is
//! persisted after the batch, or as soon as the batch stops early.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hoisync_core::config::SyncConfig;
use hoisync_core::domain::{AssetDescriptor, CatalogLookup, SyncWatermark, UploadItem};
use hoisync_core::ports::{IAssetSource, IRemoteCatalog, ISettingsStore, IUploadTransport};

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Idle,
    Discovering,
    WaitingForCapacity,
    UploadingBatch,
    Disabled,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Discovering => "discovering",
            SyncState::WaitingForCapacity => "waiting-for-capacity",
            SyncState::UploadingBatch => "uploading-batch",
            SyncState::Disabled => "disabled",
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// An empty batch was reached
    #[default]
    Completed,
    /// Sync is switched off, at start or mid-run
    Disabled,
    /// The asset source refused library access
    Unauthorized,
    /// The expiration token fired
    Expired,
    /// The catalog could not answer; the item is re-discovered next run
    Deferred,
    /// Another run was in progress; nothing was done
    AlreadyRunning,
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Assets returned by the asset source across all batches
    pub discovered: usize,
    pub enqueued: usize,
    /// Assets the server already has
    pub skipped_existing: usize,
    /// Assets that could not be resolved to a readable file
    pub unresolved: usize,
    /// Non-empty batches fetched
    pub batches: usize,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    fn with_outcome(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }
}

enum ItemOutcome {
    Enqueued,
    Exists,
    Unresolved,
    /// Stop the batch here without advancing past the item
    Deferred(String),
}

/// Resets the single-flight flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Discovery, dedup and hand-off orchestrator
pub struct SyncCoordinator {
    assets: Arc<dyn IAssetSource>,
    catalog: Arc<dyn IRemoteCatalog>,
    transport: Arc<dyn IUploadTransport>,
    settings: Arc<dyn ISettingsStore>,
    config: SyncConfig,
    running: AtomicBool,
    state: watch::Sender<SyncState>,
}

impl SyncCoordinator {
    pub fn new(
        assets: Arc<dyn IAssetSource>,
        catalog: Arc<dyn IRemoteCatalog>,
        transport: Arc<dyn IUploadTransport>,
        settings: Arc<dyn ISettingsStore>,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            assets,
            catalog,
            transport,
            settings,
            config,
            running: AtomicBool::new(false),
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs discovery batches until one comes back empty
    ///
    /// Returns at once with [`SyncOutcome::AlreadyRunning`] if a run is in
    /// progress.
    #[tracing::instrument(skip(self, expiration))]
    pub async fn start(&self, expiration: &CancellationToken) -> anyhow::Result<SyncReport> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("Sync already running, ignoring trigger");
            return Ok(SyncReport::with_outcome(SyncOutcome::AlreadyRunning));
        };
        self.execute(expiration).await
    }

    /// Resets the watermark to the epoch and starts a full re-scan
    #[tracing::instrument(skip(self, expiration))]
    pub async fn start_again(&self, expiration: &CancellationToken) -> anyhow::Result<SyncReport> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("Sync already running, ignoring re-scan");
            return Ok(SyncReport::with_outcome(SyncOutcome::AlreadyRunning));
        };
        self.settings
            .set_watermark(*SyncWatermark::epoch().as_datetime())
            .await
            .context("Failed to reset sync watermark")?;
        info!("Watermark reset, starting full re-scan");
        self.execute(expiration).await
    }

    async fn execute(&self, expiration: &CancellationToken) -> anyhow::Result<SyncReport> {
        let mut report = SyncReport::default();
        let result = self.run(expiration, &mut report).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(SyncState::Idle);
                return Err(e);
            }
        };
        report.outcome = outcome;
        self.set_state(if outcome == SyncOutcome::Disabled {
            SyncState::Disabled
        } else {
            SyncState::Idle
        });

        info!(
            outcome = ?report.outcome,
            discovered = report.discovered,
            enqueued = report.enqueued,
            skipped_existing = report.skipped_existing,
            unresolved = report.unresolved,
            batches = report.batches,
            "Sync run finished"
        );
        Ok(report)
    }

    async fn run(
        &self,
        expiration: &CancellationToken,
        report: &mut SyncReport,
    ) -> anyhow::Result<SyncOutcome> {
        if !self.enabled().await? {
            info!("Sync is disabled");
            return Ok(SyncOutcome::Disabled);
        }

        self.set_state(SyncState::Discovering);
        let authorization = tokio::select! {
            _ = expiration.cancelled() => return Ok(SyncOutcome::Expired),
            status = self.assets.request_authorization() => status,
        };
        if !authorization.is_allowed() {
            warn!(?authorization, "Media library access denied");
            return Ok(SyncOutcome::Unauthorized);
        }

        let stored = self
            .settings
            .get_watermark()
            .await
            .context("Failed to read sync watermark")?
            .map(SyncWatermark::from_datetime)
            .unwrap_or_default();
        let mut watermark = stored;
        let mut persisted = stored;

        loop {
            if let Some(outcome) = self.wait_for_capacity(expiration).await? {
                return Ok(outcome);
            }

            self.set_state(SyncState::UploadingBatch);
            let batch = self
                .assets
                .fetch_since(*watermark.as_datetime(), self.config.batch_ceiling)
                .await
                .context("Failed to fetch assets")?;
            if batch.is_empty() {
                debug!(watermark = %watermark, "No new assets");
                return Ok(SyncOutcome::Completed);
            }

            report.batches += 1;
            report.discovered += batch.len();
            debug!(size = batch.len(), watermark = %watermark, "Processing batch");

            let result = self
                .process_batch(&batch, &mut watermark, report, expiration)
                .await;

            if watermark > persisted {
                self.settings
                    .set_watermark(*watermark.as_datetime())
                    .await
                    .context("Failed to persist sync watermark")?;
                persisted = watermark;
                debug!(watermark = %watermark, "Watermark persisted");
            }

            if let Some(outcome) = result? {
                return Ok(outcome);
            }
        }
    }

    /// Handles one batch; `Some` stops the run with that outcome
    async fn process_batch(
        &self,
        batch: &[AssetDescriptor],
        watermark: &mut SyncWatermark,
        report: &mut SyncReport,
        expiration: &CancellationToken,
    ) -> anyhow::Result<Option<SyncOutcome>> {
        for asset in batch {
            if expiration.is_cancelled() {
                info!("Expiration reached, stopping batch");
                return Ok(Some(SyncOutcome::Expired));
            }
            if !self.enabled().await? {
                info!("Sync disabled during run, stopping batch");
                return Ok(Some(SyncOutcome::Disabled));
            }

            match self.process_item(asset).await? {
                ItemOutcome::Enqueued => report.enqueued += 1,
                ItemOutcome::Exists => report.skipped_existing += 1,
                ItemOutcome::Unresolved => report.unresolved += 1,
                ItemOutcome::Deferred(reason) => {
                    warn!(
                        stable_id = %asset.stable_id,
                        %reason,
                        "Catalog lookup failed, deferring to next run"
                    );
                    return Ok(Some(SyncOutcome::Deferred));
                }
            }
            watermark.advance(asset.created_at);
        }
        Ok(None)
    }

    async fn process_item(&self, asset: &AssetDescriptor) -> anyhow::Result<ItemOutcome> {
        let Some(source) = self.assets.resolve_url(&asset.stable_id).await else {
            warn!(stable_id = %asset.stable_id, "Asset could not be resolved, skipping");
            return Ok(ItemOutcome::Unresolved);
        };

        match self.catalog.get_by_item_id(&asset.stable_id).await {
            CatalogLookup::Found(record) => {
                debug!(
                    stable_id = %asset.stable_id,
                    remote_id = record.id,
                    "Already on server"
                );
                Ok(ItemOutcome::Exists)
            }
            CatalogLookup::TransientError(reason) => Ok(ItemOutcome::Deferred(reason)),
            CatalogLookup::NotFound => {
                let mut item =
                    UploadItem::new(asset.stable_id.clone(), source).with_created_at(asset.created_at);
                if let Some(filename) = &asset.filename {
                    item.filename = filename.clone();
                }
                let session_id = self
                    .transport
                    .enqueue(item)
                    .await
                    .with_context(|| format!("Failed to enqueue {}", asset.stable_id))?;
                debug!(stable_id = %asset.stable_id, %session_id, "Enqueued");
                Ok(ItemOutcome::Enqueued)
            }
        }
    }

    /// Polls until fewer than `batch_ceiling` uploads are outstanding
    ///
    /// Returns `Some` when the run must stop instead.
    async fn wait_for_capacity(
        &self,
        expiration: &CancellationToken,
    ) -> anyhow::Result<Option<SyncOutcome>> {
        self.set_state(SyncState::WaitingForCapacity);
        loop {
            if expiration.is_cancelled() {
                return Ok(Some(SyncOutcome::Expired));
            }
            let remaining = self
                .transport
                .remaining_uploads()
                .await
                .context("Failed to count remaining uploads")?;
            if remaining < self.config.batch_ceiling {
                return Ok(None);
            }

            debug!(remaining, ceiling = self.config.batch_ceiling, "Waiting for upload capacity");
            tokio::select! {
                _ = expiration.cancelled() => return Ok(Some(SyncOutcome::Expired)),
                _ = tokio::time::sleep(self.config.capacity_poll_interval()) => {}
            }
            if !self.enabled().await? {
                return Ok(Some(SyncOutcome::Disabled));
            }
        }
    }

    async fn enabled(&self) -> anyhow::Result<bool> {
        self.settings
            .is_sync_enabled()
            .await
            .context("Failed to read sync enabled flag")
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Sync state changed");
        }
    }
}
