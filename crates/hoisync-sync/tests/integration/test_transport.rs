//! Integration tests for the chunked upload transport

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hoisync_core::domain::{ServerEndpoint, StableId, UploadItem, UploadSession, UploadStatus};
use hoisync_core::ports::{ISessionStore, IUploadTransport, SessionFilter, StoredSession};
use hoisync_sync::progress::{ProgressTracker, UPLOADS_TRACKER};
use hoisync_sync::transport::{ChunkedUploadTransport, TransportSettings, CANCELLED_REASON};

use crate::common;

const TEN_BYTES: &[u8] = b"0123456789";

fn item(stable_id: &str, source: &std::path::Path) -> UploadItem {
    UploadItem::new(StableId::new(stable_id).unwrap(), source)
}

fn transport(
    endpoint: ServerEndpoint,
    repo: &hoisync_cache::SqliteStateRepository,
    settings: TransportSettings,
    shutdown: CancellationToken,
) -> ChunkedUploadTransport {
    ChunkedUploadTransport::new(
        endpoint,
        Arc::new(repo.clone()),
        Arc::new(ProgressTracker::in_memory(UPLOADS_TRACKER)),
        settings,
        shutdown,
    )
    .unwrap()
}

async fn all_sessions(repo: &hoisync_cache::SqliteStateRepository) -> Vec<UploadSession> {
    repo.list_sessions(&SessionFilter::new())
        .await
        .unwrap()
        .into_iter()
        .filter_map(|s| match s {
            StoredSession::Valid(session) => Some(session),
            StoredSession::Corrupt { .. } => None,
        })
        .collect()
}

// ============================================================================
// Enqueue and transfer
// ============================================================================

#[tokio::test]
async fn test_enqueue_uploads_file_in_chunks() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "IMG_0001.JPG", TEN_BYTES);

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 2),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(session.bytes_uploaded(), 10);
    assert_eq!(state.patch_count(), 3);

    let uploads = state.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].data, TEN_BYTES);
    assert_eq!(uploads[0].authorization, format!("Bearer {}", common::API_KEY));
    assert!(uploads[0].metadata.contains("itemId YXNzZXQtMQ=="));

    assert_eq!(transport.progress().rate("asset-1"), 1.0);
    assert_eq!(transport.remaining_uploads().await.unwrap(), 0);
    assert_eq!(transport.active_transfers(), 0);
}

#[tokio::test]
async fn test_empty_file_completes_without_chunks() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "empty.jpg", b"");

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("empty", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(state.creation_count(), 1);
    assert_eq!(state.patch_count(), 0);
}

#[tokio::test]
async fn test_missing_source_is_rejected() {
    let (server, _state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let result = transport
        .enqueue(item("ghost", std::path::Path::new("/nonexistent/ghost.jpg")))
        .await;

    assert!(result.is_err());
    assert!(all_sessions(&repo).await.is_empty());
    assert!(!transport.progress().contains("ghost"));
}

#[tokio::test]
async fn test_transient_chunk_errors_are_retried() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    state.failing_patches.store(2, Ordering::SeqCst);

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Completed);
    assert_eq!(state.patch_count(), 5);
    assert_eq!(state.uploads()[0].data, TEN_BYTES);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_session() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    state.failing_patches.store(100, Ordering::SeqCst);

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert!(session.last_error().unwrap().contains("Server error"));
    assert_eq!(state.patch_count(), 3);
    assert!(!transport.progress().contains("asset-1"));
    assert_eq!(transport.remaining_uploads().await.unwrap(), 0);
}

#[tokio::test]
async fn test_offset_conflict_resumes_from_probed_offset() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    // After the first chunk lands, the server loses half of it
    state.roll_back_at_patch(2, 2);

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Completed);
    // 0..4 sent, 4..8 refused, then 2..6 and 6..10
    assert_eq!(state.patch_count(), 4);
    assert_eq!(state.creation_count(), 1);
    assert_eq!(state.uploads()[0].data, TEN_BYTES);
}

#[tokio::test]
async fn test_repeated_offset_conflicts_fail_the_session() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    for patch in 2..=10 {
        state.roll_back_at_patch(patch, 4);
    }

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    transport.wait_idle().await;

    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert!(session.last_error().unwrap().contains("Conflict"));
    // One good chunk, three resynchronised conflicts, then the fourth is final
    assert_eq!(state.patch_count(), 5);
    assert_eq!(session.bytes_uploaded(), 4);
    assert!(!transport.progress().contains("asset-1"));
}

#[tokio::test]
async fn test_single_worker_drains_every_session() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    for name in ["a", "b", "c"] {
        let source = common::write_source(dir.path(), &format!("{name}.jpg"), TEN_BYTES);
        transport.enqueue(item(name, &source)).await.unwrap();
    }
    transport.wait_idle().await;

    let sessions = all_sessions(&repo).await;
    assert_eq!(sessions.len(), 3);
    assert!(sessions.iter().all(|s| s.status() == UploadStatus::Completed));
    assert_eq!(state.patch_count(), 9);
    assert_eq!(transport.prune_completed().await.unwrap(), 3);
    assert!(all_sessions(&repo).await.is_empty());
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_open_resumes_from_server_offset() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    let endpoint = common::endpoint(&server);

    state.seed("resume-1", 10, &TEN_BYTES[..4]);
    let mut session = UploadSession::new(&item("asset-1", &source), &endpoint, String::new(), 10);
    session.set_upload_url(format!("{}/tus/resume-1", server.uri()));
    session.start_uploading().unwrap();
    repo.save_session(&session).await.unwrap();

    let transport = ChunkedUploadTransport::open(
        endpoint,
        Arc::new(repo.clone()),
        Arc::new(ProgressTracker::in_memory(UPLOADS_TRACKER)),
        common::fast_settings(4, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    transport.wait_idle().await;

    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), UploadStatus::Completed);
    assert_eq!(state.creation_count(), 0);
    assert_eq!(state.patch_count(), 2);
    assert_eq!(state.upload("resume-1").unwrap().data, TEN_BYTES);
}

#[tokio::test]
async fn test_resume_recreates_upload_the_server_forgot() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    let endpoint = common::endpoint(&server);

    let mut session = UploadSession::new(&item("asset-1", &source), &endpoint, String::new(), 10);
    session.set_upload_url(format!("{}/tus/forgotten", server.uri()));
    repo.save_session(&session).await.unwrap();

    let transport = transport(endpoint, &repo, common::fast_settings(4, 1), CancellationToken::new());
    let report = transport.resume_pending().await.unwrap();
    assert_eq!(report.retried, vec![*session.id()]);
    transport.wait_idle().await;

    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), UploadStatus::Completed);
    assert_eq!(state.creation_count(), 1);
    assert!(stored.upload_url().unwrap().ends_with("/tus/u1"));
}

#[tokio::test]
async fn test_expiration_pauses_then_next_run_resumes() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let contents = b"abcdefghijkl";
    let source = common::write_source(dir.path(), "a.jpg", contents);
    state.set_patch_delay(Duration::from_millis(100));

    let shutdown = CancellationToken::new();
    let first = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        shutdown.clone(),
    );
    let id = first.enqueue(item("asset-1", &source)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    first.wait_idle().await;

    let paused = repo.get_session(&id).await.unwrap().unwrap();
    assert!(paused.status().is_remaining());
    assert!(paused.bytes_uploaded() < 12);
    assert_eq!(first.remaining_uploads().await.unwrap(), 1);

    *state.patch_delay.lock().unwrap() = None;
    let second = ChunkedUploadTransport::open(
        common::endpoint(&server),
        Arc::new(repo.clone()),
        Arc::new(ProgressTracker::in_memory(UPLOADS_TRACKER)),
        common::fast_settings(4, 1),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    second.wait_idle().await;

    let done = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(done.status(), UploadStatus::Completed);
    assert_eq!(state.uploads()[0].data, contents);
}

// ============================================================================
// Retry, cancel, remove
// ============================================================================

#[tokio::test]
async fn test_retry_failed_uploads_checks_server_identity() {
    let (server, _state) = common::start_tus_server().await;
    let (pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", TEN_BYTES);
    let endpoint = common::endpoint(&server);

    let failed = |endpoint: &ServerEndpoint, stable_id: &str| {
        let mut session =
            UploadSession::new(&item(stable_id, &source), endpoint, String::new(), 10);
        session.fail("boom").unwrap();
        session
    };
    let same = failed(&endpoint, "same");
    let other_host = failed(
        &ServerEndpoint::new("https://other.example.com", common::API_KEY).unwrap(),
        "other-host",
    );
    let other_key = failed(&ServerEndpoint::new(server.uri(), "rotated-key").unwrap(), "other-key");
    for session in [&same, &other_host, &other_key] {
        repo.save_session(session).await.unwrap();
    }
    sqlx::query(
        "INSERT INTO upload_sessions \
         (id, stable_id, filename, source_path, endpoint_origin, custom_headers, \
          bytes_uploaded, total_bytes, status, created_at, updated_at) \
         VALUES ('not-a-uuid', 'x', 'x.jpg', '/tmp/x.jpg', 'https://photos.example.com', \
                 '{}', 0, 10, 'exploded', '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
    )
    .execute(pool.pool())
    .await
    .unwrap();

    let transport = transport(endpoint, &repo, common::fast_settings(4, 1), CancellationToken::new());
    let report = transport.retry_failed_uploads().await.unwrap();
    transport.wait_idle().await;

    assert_eq!(report.retried, vec![*same.id()]);
    assert_eq!(report.cancelled.len(), 2);
    assert!(report.cancelled.contains(other_host.id()));
    assert!(report.cancelled.contains(other_key.id()));
    assert_eq!(report.corrupt_removed, 1);

    let remaining = repo.list_sessions(&SessionFilter::new()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    let stored = repo.get_session(same.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), UploadStatus::Completed);
    assert_eq!(stored.last_error(), None);
}

#[tokio::test]
async fn test_cancel_marks_session_failed() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", b"abcdefghijkl");
    state.set_patch_delay(Duration::from_millis(100));

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();

    assert!(transport.cancel(&id).await.unwrap());
    let session = repo.get_session(&id).await.unwrap().unwrap();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert_eq!(session.last_error(), Some(CANCELLED_REASON));
    assert!(!transport.progress().contains("asset-1"));
    assert_eq!(transport.active_transfers(), 0);

    assert!(!transport.cancel(&id).await.unwrap());
}

#[tokio::test]
async fn test_remove_cache_forgets_session_and_server_upload() {
    let (server, state) = common::start_tus_server().await;
    let (_pool, repo) = common::memory_repository().await;
    let dir = tempfile::tempdir().unwrap();
    let source = common::write_source(dir.path(), "a.jpg", b"abcdefghijkl");
    state.set_patch_delay(Duration::from_millis(100));

    let transport = transport(
        common::endpoint(&server),
        &repo,
        common::fast_settings(4, 1),
        CancellationToken::new(),
    );
    let id = transport.enqueue(item("asset-1", &source)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    transport.remove_cache(&id).await.unwrap();

    assert!(repo.get_session(&id).await.unwrap().is_none());
    assert!(state.uploads().is_empty());
    assert!(!transport.progress().contains("asset-1"));
}
