//! Upload and download progress tracking
//!
//! A [`ProgressTracker`] is a map from item id to [`ProgressRecord`], shared
//! between the transport (writer) and observers such as the CLI (readers).
//!
//! ## Persistence
//!
//! Mutations only mark the tracker dirty. The full map is written by an
//! explicit [`ProgressTracker::save`] or by the debounced background writer
//! started with [`ProgressTracker::spawn_writer`]. Saving snapshots the map
//! under the lock and serializes outside of it.
//!
//! Loading never fails: a missing, unreadable or corrupt snapshot yields an
//! empty tracker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hoisync_core::domain::ProgressRecord;
use hoisync_core::ports::IProgressStore;

/// Tracker name for uploads
pub const UPLOADS_TRACKER: &str = "uploads";

/// Tracker name for downloads
pub const DOWNLOADS_TRACKER: &str = "downloads";

type ProgressMap = BTreeMap<String, ProgressRecord>;

/// In-memory progress map with optional persistence
pub struct ProgressTracker {
    name: String,
    records: Mutex<ProgressMap>,
    dirty: AtomicBool,
    changed: Notify,
    store: Option<Arc<dyn IProgressStore>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl ProgressTracker {
    /// Creates an empty tracker that is never persisted
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::with_records(name.into(), ProgressMap::new(), None)
    }

    /// Loads the last snapshot saved under `name`
    pub async fn load(name: impl Into<String>, store: Arc<dyn IProgressStore>) -> Self {
        let name = name.into();
        let records = match store.load_progress(&name).await {
            Ok(Some(snapshot)) => decode_snapshot(&name, &snapshot),
            Ok(None) => ProgressMap::new(),
            Err(e) => {
                warn!(tracker = %name, error = %e, "Failed to read progress, starting empty");
                ProgressMap::new()
            }
        };
        debug!(tracker = %name, records = records.len(), "Progress tracker loaded");
        Self::with_records(name, records, Some(store))
    }

    fn with_records(
        name: String,
        records: ProgressMap,
        store: Option<Arc<dyn IProgressStore>>,
    ) -> Self {
        Self {
            name,
            records: Mutex::new(records),
            dirty: AtomicBool::new(false),
            changed: Notify::new(),
            store,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether there are changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // --- mutations ---

    /// Starts (or restarts) tracking `id` at rate 0
    pub fn start(&self, id: &str) {
        self.lock()
            .insert(id.to_string(), ProgressRecord::started(id));
        self.mark_dirty();
    }

    /// Sets the rate of a tracked id; untracked ids are ignored
    pub fn update(&self, id: &str, rate: f64) {
        let changed = match self.lock().get_mut(id) {
            Some(record) => {
                record.set_rate(rate);
                true
            }
            None => false,
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Sets the rate of a tracked id to 1
    pub fn complete(&self, id: &str) {
        self.update(id, 1.0);
    }

    pub fn remove(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            self.mark_dirty();
        }
    }

    /// Drops the record of a transfer that failed terminally
    ///
    /// The failure itself is kept by the upload session, not here.
    pub fn mark_failed(&self, id: &str) {
        debug!(tracker = %self.name, id, "Removing progress of failed transfer");
        self.remove(id);
    }

    pub fn clear(&self) {
        let had_records = {
            let mut records = self.lock();
            let had = !records.is_empty();
            records.clear();
            had
        };
        if had_records {
            self.mark_dirty();
        }
    }

    // --- queries ---

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<ProgressRecord> {
        self.lock().get(id).cloned()
    }

    /// Rate of `id`, 0 when untracked
    pub fn rate(&self, id: &str) -> f64 {
        self.lock().get(id).map(ProgressRecord::rate).unwrap_or(0.0)
    }

    pub fn start_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(id).map(ProgressRecord::start_time)
    }

    /// A copy of all records, ordered by id
    pub fn snapshot(&self) -> Vec<ProgressRecord> {
        self.lock().values().cloned().collect()
    }

    /// Fraction of records that are complete, 0 when empty
    pub fn completed_rate(&self) -> f64 {
        let records = self.lock();
        if records.is_empty() {
            return 0.0;
        }
        let completed = records.values().filter(|r| r.is_complete()).count();
        completed as f64 / records.len() as f64
    }

    /// Sum of incomplete rates over the record count, 0 when empty
    pub fn partially_completed_rate(&self) -> f64 {
        let records = self.lock();
        if records.is_empty() {
            return 0.0;
        }
        let pending: f64 = records
            .values()
            .filter(|r| !r.is_complete())
            .map(ProgressRecord::rate)
            .sum();
        pending / records.len() as f64
    }

    /// Mean rate, 1 when empty
    pub fn overall_rate(&self) -> f64 {
        let records = self.lock();
        if records.is_empty() {
            return 1.0;
        }
        let total: f64 = records.values().map(ProgressRecord::rate).sum();
        total / records.len() as f64
    }

    /// `"0"` when empty, `"n"` when everything is done, `"done / n"` otherwise
    pub fn summary(&self) -> String {
        let size = self.len();
        let overall = self.overall_rate();
        if size == 0 {
            "0".to_string()
        } else if overall >= 1.0 {
            size.to_string()
        } else {
            let done = (overall * size as f64).floor() as usize;
            format!("{} / {}", done, size)
        }
    }

    // --- persistence ---

    /// Writes the full map to the store
    ///
    /// A tracker without a store just clears its dirty flag. On failure the
    /// tracker stays dirty so the next save retries.
    pub async fn save(&self) -> anyhow::Result<()> {
        self.dirty.store(false, Ordering::Release);

        let Some(store) = &self.store else {
            return Ok(());
        };

        let snapshot = {
            let records = self.lock();
            serde_json::to_string(&*records)
        };
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
        };

        if let Err(e) = store.save_progress(&self.name, &snapshot).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        debug!(tracker = %self.name, bytes = snapshot.len(), "Progress saved");
        Ok(())
    }

    /// Saves at most once per `debounce` while changes keep arriving
    ///
    /// The task performs a final save when `shutdown` is cancelled.
    pub fn spawn_writer(
        self: &Arc<Self>,
        debounce: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tracker.changed.notified() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(debounce) => {}
                        }
                        if tracker.is_dirty() {
                            if let Err(e) = tracker.save().await {
                                warn!(tracker = %tracker.name, error = %e, "Failed to save progress");
                            }
                        }
                    }
                }
            }

            if tracker.is_dirty() {
                if let Err(e) = tracker.save().await {
                    warn!(tracker = %tracker.name, error = %e, "Final progress save failed");
                }
            }
            debug!(tracker = %tracker.name, "Progress writer stopped");
        })
    }
}

fn decode_snapshot(name: &str, snapshot: &str) -> ProgressMap {
    match serde_json::from_str::<ProgressMap>(snapshot) {
        Ok(records) => records
            .into_iter()
            .map(|(id, record)| (id, record.normalized()))
            .collect(),
        Err(e) => {
            warn!(tracker = %name, error = %e, "Corrupt progress snapshot, starting empty");
            ProgressMap::new()
        }
    }
}
