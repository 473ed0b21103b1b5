//! Chunked resumable upload transport
//!
//! [`ChunkedUploadTransport`] owns every upload session for one server
//! identity (host + api key). Sessions are persisted before any network
//! traffic, so an interrupted process resumes them on the next start.
//!
//! ## Session lifecycle
//!
//! ```text
//! enqueue ──→ pending ──→ uploading ──→ completed
//!                │            │
//!                └────────────┴──→ failed ──(retry_failed_uploads)──→ pending
//! ```
//!
//! - At most `max_concurrent` sessions transfer at once (a semaphore).
//! - Each request is retried with exponential backoff on transient errors;
//!   exhausting retries marks the session failed.
//! - The expiration token stops transfers at chunk boundaries and leaves
//!   them `uploading` for [`ChunkedUploadTransport::resume_pending`].
//!
//! ## Progress
//!
//! The shared [`ProgressTracker`] is keyed by stable id: started on enqueue,
//! updated after every acknowledged chunk, completed at the end and removed
//! on terminal failure.

use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use hoisync_api::tus::{encode_upload_metadata, TusClient};
use hoisync_api::ApiError;
use hoisync_core::config::UploadConfig;
use hoisync_core::domain::{ServerEndpoint, SessionId, UploadItem, UploadSession, UploadStatus};
use hoisync_core::ports::{
    ISessionStore, IUploadTransport, RetryReport, SessionFilter, StoredSession,
};

use crate::progress::ProgressTracker;
use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Offset re-synchronisations allowed per transfer after a 409
const MAX_OFFSET_RESYNCS: u32 = 3;

/// Reason recorded on sessions stopped by [`ChunkedUploadTransport::cancel`]
pub const CANCELLED_REASON: &str = "cancelled";

// ============================================================================
// Settings
// ============================================================================

/// Tuning knobs for the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Bytes per PATCH request
    pub chunk_size: usize,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
}

impl TransportSettings {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes().max(1),
            max_concurrent: config.max_concurrent.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

// ============================================================================
// ChunkedUploadTransport
// ============================================================================

struct ActiveTransfer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct TransportInner {
    endpoint: ServerEndpoint,
    tus: TusClient,
    sessions: Arc<dyn ISessionStore>,
    progress: Arc<ProgressTracker>,
    settings: TransportSettings,
    permits: Arc<Semaphore>,
    /// Expiration signal; every transfer token is a child of it
    shutdown: CancellationToken,
    tasks: TaskTracker,
    active: Mutex<HashMap<SessionId, ActiveTransfer>>,
}

/// Resumable upload session manager scoped to one server identity
///
/// Cloning is cheap; clones share sessions, workers and progress.
#[derive(Clone)]
pub struct ChunkedUploadTransport {
    inner: Arc<TransportInner>,
}

impl ChunkedUploadTransport {
    /// Creates a transport without touching stored sessions
    pub fn new(
        endpoint: ServerEndpoint,
        sessions: Arc<dyn ISessionStore>,
        progress: Arc<ProgressTracker>,
        settings: TransportSettings,
        shutdown: CancellationToken,
    ) -> Result<Self, SyncError> {
        let tus = TusClient::from_endpoint(&endpoint)?;
        Ok(Self {
            inner: Arc::new(TransportInner {
                endpoint,
                tus,
                sessions,
                progress,
                permits: Arc::new(Semaphore::new(settings.max_concurrent)),
                settings,
                shutdown,
                tasks: TaskTracker::new(),
                active: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Creates a transport and picks up sessions left by earlier runs
    ///
    /// Interrupted sessions are resumed and failed ones retried, both
    /// validated against `endpoint`.
    pub async fn open(
        endpoint: ServerEndpoint,
        sessions: Arc<dyn ISessionStore>,
        progress: Arc<ProgressTracker>,
        settings: TransportSettings,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let transport = Self::new(endpoint, sessions, progress, settings, shutdown)?;
        let resumed = transport.resume_pending().await?;
        let retried = transport.retry_failed_uploads().await?;
        info!(
            resumed = resumed.retried.len(),
            retried = retried.retried.len(),
            cancelled = resumed.cancelled.len() + retried.cancelled.len(),
            "Upload transport opened"
        );
        Ok(transport)
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.inner.endpoint
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.inner.progress
    }

    /// Sessions currently owned by a worker (queued on the pool or sending)
    pub fn active_transfers(&self) -> usize {
        self.inner.lock_active().len()
    }

    /// Waits until every worker spawned so far has finished
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Re-drives sessions that a previous process left `pending` or
    /// `uploading`
    #[tracing::instrument(skip(self))]
    pub async fn resume_pending(&self) -> anyhow::Result<RetryReport> {
        let filter = SessionFilter::new()
            .with_status(UploadStatus::Pending)
            .with_status(UploadStatus::Uploading);

        self.revalidate(&filter, |transport, session| {
            if !transport.inner.progress.contains(session.stable_id().as_str()) {
                transport.inner.progress.start(session.stable_id().as_str());
            }
            transport
                .inner
                .progress
                .update(session.stable_id().as_str(), session.fraction());
            Ok(session)
        })
        .await
    }

    /// Marks an unfinished session failed with reason `cancelled`
    ///
    /// A running transfer is stopped at its next chunk boundary and awaited.
    /// Returns `false` when there was nothing to cancel.
    pub async fn cancel(&self, id: &SessionId) -> anyhow::Result<bool> {
        if let Some(active) = self.inner.take_active(id) {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                warn!(session_id = %id, error = %e, "Upload worker ended abnormally");
            }
            return Ok(true);
        }

        match self.inner.sessions.get_session(id).await? {
            Some(mut session) if session.status().is_remaining() => {
                session.fail(CANCELLED_REASON)?;
                self.inner.sessions.save_session(&session).await?;
                self.inner.progress.mark_failed(session.stable_id().as_str());
                info!(session_id = %id, "Upload cancelled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Stops and forgets a session, including its server-side upload
    pub async fn remove_cache(&self, id: &SessionId) -> anyhow::Result<()> {
        if let Some(active) = self.inner.take_active(id) {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                warn!(session_id = %id, error = %e, "Upload worker ended abnormally");
            }
        }

        let session = match self.inner.sessions.get_session(id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Removing unreadable session");
                None
            }
        };

        if let Some(session) = session {
            if let (Some(url), true) = (session.upload_url(), session.belongs_to(self.endpoint())) {
                if let Err(e) = self.inner.tus.terminate(url, session.custom_headers()).await {
                    debug!(session_id = %id, error = %e, "Server-side termination failed");
                }
            }
            self.inner.progress.remove(session.stable_id().as_str());
        }

        self.inner.sessions.delete_session(&id.to_string()).await?;
        info!(session_id = %id, "Upload session removed");
        Ok(())
    }

    /// Deletes completed sessions and returns how many were removed
    pub async fn prune_completed(&self) -> anyhow::Result<usize> {
        let filter = SessionFilter::new().with_status(UploadStatus::Completed);
        let mut removed = 0;
        for stored in self.inner.sessions.list_sessions(&filter).await? {
            if let StoredSession::Valid(session) = stored {
                self.inner
                    .sessions
                    .delete_session(&session.id().to_string())
                    .await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Pruned completed sessions");
        }
        Ok(removed)
    }

    /// Walks stored sessions matching `filter`: corrupt rows are deleted,
    /// sessions for another identity are discarded, the rest are prepared
    /// by `prepare` and handed to a worker
    async fn revalidate<P>(&self, filter: &SessionFilter, prepare: P) -> anyhow::Result<RetryReport>
    where
        P: Fn(&Self, UploadSession) -> anyhow::Result<UploadSession>,
    {
        let mut report = RetryReport::default();

        for stored in self.inner.sessions.list_sessions(filter).await? {
            match stored {
                StoredSession::Corrupt { id, reason } => {
                    warn!(session_id = %id, %reason, "Removing corrupt upload session");
                    self.inner.sessions.delete_session(&id).await?;
                    report.corrupt_removed += 1;
                }
                StoredSession::Valid(session) => {
                    let id = *session.id();
                    if self.inner.is_active(&id) {
                        continue;
                    }
                    if session.belongs_to(self.endpoint()) {
                        let session = prepare(self, session)?;
                        self.inner.sessions.save_session(&session).await?;
                        self.spawn(session);
                        report.retried.push(id);
                    } else {
                        info!(
                            session_id = %id,
                            origin = session.endpoint_origin(),
                            "Cancelling upload created for another server identity"
                        );
                        self.inner.progress.remove(session.stable_id().as_str());
                        self.inner.sessions.delete_session(&id.to_string()).await?;
                        report.cancelled.push(id);
                    }
                }
            }
        }

        Ok(report)
    }

    fn spawn(&self, session: UploadSession) {
        let id = *session.id();
        let mut active = self.inner.lock_active();
        if active.contains_key(&id) {
            return;
        }
        let cancel = self.inner.shutdown.child_token();
        let handle = self
            .inner
            .tasks
            .spawn(drive(Arc::clone(&self.inner), session, cancel.clone()));
        active.insert(id, ActiveTransfer { cancel, handle });
    }
}

// ============================================================================
// IUploadTransport implementation
// ============================================================================

#[async_trait::async_trait]
impl IUploadTransport for ChunkedUploadTransport {
    #[tracing::instrument(skip(self, item), fields(stable_id = %item.stable_id))]
    async fn enqueue(&self, item: UploadItem) -> anyhow::Result<SessionId> {
        let metadata = tokio::fs::metadata(&item.source)
            .await
            .map_err(|e| source_error(&item.source, e))?;
        if !metadata.is_file() {
            return Err(SyncError::SourceMissing(item.source.clone()).into());
        }

        let header = encode_upload_metadata(&item.upload_metadata());
        let session = UploadSession::new(&item, self.endpoint(), header, metadata.len());
        self.inner.sessions.save_session(&session).await?;
        self.inner.progress.start(item.stable_id.as_str());

        let id = *session.id();
        info!(
            session_id = %id,
            filename = %item.filename,
            total_bytes = metadata.len(),
            "Upload enqueued"
        );
        self.spawn(session);
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    async fn retry_failed_uploads(&self) -> anyhow::Result<RetryReport> {
        let filter = SessionFilter::new().with_status(UploadStatus::Failed);
        let report = self
            .revalidate(&filter, |transport, mut session| {
                session.reset_for_retry()?;
                transport.inner.progress.start(session.stable_id().as_str());
                Ok(session)
            })
            .await?;

        if !report.retried.is_empty() || !report.cancelled.is_empty() {
            info!(
                retried = report.retried.len(),
                cancelled = report.cancelled.len(),
                corrupt_removed = report.corrupt_removed,
                "Retried failed uploads"
            );
        }
        Ok(report)
    }

    async fn remaining_uploads(&self) -> anyhow::Result<usize> {
        self.inner.sessions.count_remaining().await
    }
}

// ============================================================================
// Worker
// ============================================================================

impl TransportInner {
    fn lock_active(&self) -> MutexGuard<'_, HashMap<SessionId, ActiveTransfer>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, id: &SessionId) -> bool {
        self.lock_active().contains_key(id)
    }

    fn take_active(&self, id: &SessionId) -> Option<ActiveTransfer> {
        self.lock_active().remove(id)
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        }
    }

    async fn persist(&self, session: &UploadSession) {
        if let Err(e) = self.sessions.save_session(session).await {
            warn!(session_id = %session.id(), error = %e, "Failed to persist upload session");
        }
    }

    fn report(&self, session: &UploadSession) {
        self.progress
            .update(session.stable_id().as_str(), session.fraction());
    }

    /// Resolves the upload URL and the offset to continue from
    ///
    /// A stored URL is probed; if the server no longer knows it, a new
    /// upload is created.
    async fn establish(
        &self,
        session: &mut UploadSession,
        headers: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(String, u64), SyncError> {
        let policy = self.settings.retry;

        if let Some(url) = session.upload_url().map(str::to_string) {
            let probed = with_retry("probe_offset", &policy, cancel, || async {
                Ok(self.tus.probe_offset(&url, headers).await?)
            })
            .await;
            match probed {
                Ok(offset) => return Ok((url, offset)),
                Err(SyncError::ApiError(ApiError::NotFound(_))) => {
                    info!(session_id = %session.id(), "Server dropped the upload, recreating");
                }
                Err(e) => return Err(e),
            }
        }

        let total = session.total_bytes();
        let url = with_retry("create_upload", &policy, cancel, || async {
            Ok(self.tus.create_upload(total, headers).await?)
        })
        .await?;
        session.set_upload_url(url.clone());
        self.persist(session).await;
        Ok((url, 0))
    }

    async fn transfer(
        &self,
        session: &mut UploadSession,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        session.start_uploading()?;
        self.persist(session).await;

        let mut file = open_source(session.source_path()).await?;
        let total = session.total_bytes();
        let headers = session.custom_headers().clone();
        let policy = self.settings.retry;

        let (upload_url, mut offset) = self.establish(session, &headers, cancel).await?;
        if offset > total {
            return Err(ApiError::InvalidResponse(format!(
                "server offset {offset} exceeds upload length {total}"
            ))
            .into());
        }
        session.record_progress(offset)?;
        self.report(session);

        let mut resyncs = 0;
        while offset < total {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let len = (total - offset).min(self.settings.chunk_size as u64) as usize;
            let chunk = read_chunk(&mut file, offset, len).await?;

            let sent = with_retry("upload_chunk", &policy, cancel, || {
                let chunk = chunk.clone();
                let (url, headers) = (&upload_url, &headers);
                async move { Ok(self.tus.upload_chunk(url, headers, offset, chunk).await?) }
            })
            .await;

            offset = match sent {
                Ok(next) if next > offset && next <= total => next,
                Ok(next) => {
                    return Err(ApiError::InvalidResponse(format!(
                        "server offset {next} after chunk at {offset}"
                    ))
                    .into())
                }
                Err(SyncError::ApiError(ApiError::Conflict(_))) if resyncs < MAX_OFFSET_RESYNCS => {
                    resyncs += 1;
                    let probed = with_retry("probe_offset", &policy, cancel, || async {
                        Ok(self.tus.probe_offset(&upload_url, &headers).await?)
                    })
                    .await?;
                    warn!(
                        session_id = %session.id(),
                        local = offset,
                        server = probed,
                        "Upload offset mismatch, resynchronised"
                    );
                    probed.min(total)
                }
                Err(e) => return Err(e),
            };

            session.record_progress(offset)?;
            self.persist(session).await;
            self.report(session);
        }

        session.complete()?;
        self.persist(session).await;
        Ok(())
    }

    /// Records the outcome of a transfer
    async fn finish(&self, session: &mut UploadSession, outcome: Result<(), SyncError>) {
        let stable_id = session.stable_id().as_str().to_string();
        match outcome {
            Ok(()) => {
                self.progress.complete(&stable_id);
                info!(session_id = %session.id(), %stable_id, "Upload completed");
            }
            Err(SyncError::Cancelled) if self.shutdown.is_cancelled() => {
                self.persist(session).await;
                info!(
                    session_id = %session.id(),
                    bytes_uploaded = session.bytes_uploaded(),
                    "Upload paused by expiration"
                );
            }
            Err(e) => {
                let reason = match e {
                    SyncError::Cancelled => CANCELLED_REASON.to_string(),
                    other => other.to_string(),
                };
                if let Err(err) = session.fail(reason.clone()) {
                    warn!(session_id = %session.id(), error = %err, "Cannot mark session failed");
                }
                self.persist(session).await;
                self.progress.mark_failed(&stable_id);
                warn!(session_id = %session.id(), %stable_id, %reason, "Upload failed");
            }
        }
    }
}

async fn drive(inner: Arc<TransportInner>, mut session: UploadSession, cancel: CancellationToken) {
    let id = *session.id();
    let outcome = match inner.acquire(&cancel).await {
        Some(_permit) => inner.transfer(&mut session, &cancel).await,
        None => Err(SyncError::Cancelled),
    };
    inner.finish(&mut session, outcome).await;
    inner.lock_active().remove(&id);
}

fn source_error(path: &Path, e: std::io::Error) -> SyncError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SyncError::SourceMissing(path.to_path_buf())
    } else {
        SyncError::IoError(e)
    }
}

async fn open_source(path: &Path) -> Result<File, SyncError> {
    File::open(path).await.map_err(|e| source_error(path, e))
}

async fn read_chunk(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>, SyncError> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity(len);
    (&mut *file).take(len as u64).read_to_end(&mut buf).await?;
    if buf.len() < len {
        return Err(SyncError::IoError(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "source file shrank during upload",
        )));
    }
    Ok(buf)
}
