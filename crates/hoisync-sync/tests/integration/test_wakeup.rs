//! End-to-end wake-ups: directory source, SQLite state, mock server

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hoisync_cache::SqliteStateRepository;
use hoisync_core::config::{Config, ConfigBuilder};
use hoisync_core::ports::ISettingsStore;
use hoisync_sync::coordinator::SyncOutcome;
use hoisync_sync::progress::{ProgressTracker, UPLOADS_TRACKER};
use hoisync_sync::wakeup::{run_wakeup, WakeupMode, WakeupServices};

use crate::common;

fn services(repo: &SqliteStateRepository) -> WakeupServices {
    WakeupServices {
        settings: Arc::new(repo.clone()),
        sessions: Arc::new(repo.clone()),
        uploads: Arc::new(ProgressTracker::in_memory(UPLOADS_TRACKER)),
    }
}

fn config(server: &MockServer, root: &TempDir) -> Config {
    ConfigBuilder::new()
        .server(server.uri(), common::API_KEY)
        .storage_source_dir(root.path().join("photos"))
        .storage_temp_dir(root.path().join("tmp"))
        .upload_chunk_size_kb(1)
        .upload_retry_base_delay_ms(5)
        .build()
}

async fn mount_empty_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/metadata-by-item-id/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn write_photos(root: &TempDir) {
    let photos = root.path().join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    std::fs::write(photos.join("a.jpg"), vec![b'a'; 1500]).unwrap();
    std::fs::write(photos.join("b.png"), vec![b'b'; 700]).unwrap();
    std::fs::write(photos.join("readme.txt"), b"not media").unwrap();
}

#[tokio::test]
async fn test_wakeup_uploads_new_photos_once() {
    let (server, state) = common::start_tus_server().await;
    mount_empty_catalog(&server).await;
    let (_pool, repo) = common::memory_repository().await;
    repo.set_sync_enabled(true).await.unwrap();
    let root = TempDir::new().unwrap();
    write_photos(&root);
    let config = config(&server, &root);
    let services = services(&repo);

    let first = run_wakeup(&config, &services, WakeupMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.report.outcome, SyncOutcome::Completed);
    assert_eq!(first.report.enqueued, 2);
    assert_eq!(first.pruned, 2);
    assert_eq!(first.uploads_remaining, 0);
    assert_eq!(state.uploads().len(), 2);
    assert!(repo.get_watermark().await.unwrap().is_some());
    assert_eq!(services.uploads.completed_rate(), 1.0);

    let second = run_wakeup(&config, &services, WakeupMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.report.enqueued, 0);
    assert_eq!(state.uploads().len(), 2);
}

#[tokio::test]
async fn test_wakeup_with_sync_disabled_uploads_nothing() {
    let (server, state) = common::start_tus_server().await;
    mount_empty_catalog(&server).await;
    let (_pool, repo) = common::memory_repository().await;
    let root = TempDir::new().unwrap();
    write_photos(&root);

    let summary = run_wakeup(
        &config(&server, &root),
        &services(&repo),
        WakeupMode::Incremental,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.report.outcome, SyncOutcome::Disabled);
    assert!(state.uploads().is_empty());
}

#[tokio::test]
async fn test_wakeup_requires_a_configured_server() {
    let (_pool, repo) = common::memory_repository().await;
    let root = TempDir::new().unwrap();
    let config = ConfigBuilder::new()
        .storage_temp_dir(root.path().join("tmp"))
        .build();
    let result = run_wakeup(
        &config,
        &services(&repo),
        WakeupMode::Incremental,
        &CancellationToken::new(),
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_wakeup_skips_while_another_run_holds_the_lease() {
    let (server, state) = common::start_tus_server().await;
    mount_empty_catalog(&server).await;
    let (_pool, repo) = common::memory_repository().await;
    repo.set_sync_enabled(true).await.unwrap();
    let root = TempDir::new().unwrap();
    write_photos(&root);
    let config = config(&server, &root);
    let until = Utc::now() + chrono::Duration::minutes(2);
    assert!(repo.try_acquire_run_lease("other-process", until).await.unwrap());

    let summary = run_wakeup(&config, &services(&repo), WakeupMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.report.outcome, SyncOutcome::AlreadyRunning);
    assert_eq!(summary.report.enqueued, 0);
    assert!(state.uploads().is_empty());
    assert!(repo.get_watermark().await.unwrap().is_none());

    repo.release_run_lease("other-process").await.unwrap();
    let summary = run_wakeup(&config, &services(&repo), WakeupMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.report.outcome, SyncOutcome::Completed);
    assert_eq!(state.uploads().len(), 2);
}

#[tokio::test]
async fn test_concurrent_wakeups_upload_each_photo_once() {
    let (server, state) = common::start_tus_server().await;
    mount_empty_catalog(&server).await;
    let (_pool, repo) = common::memory_repository().await;
    repo.set_sync_enabled(true).await.unwrap();
    let root = TempDir::new().unwrap();
    write_photos(&root);
    let config = config(&server, &root);
    // Separate trackers, as two processes would have
    let daemon = services(&repo);
    let manual = services(&repo);
    let token = CancellationToken::new();

    let (first, second) = tokio::join!(
        run_wakeup(&config, &daemon, WakeupMode::Incremental, &token),
        run_wakeup(&config, &manual, WakeupMode::Incremental, &token),
    );
    let outcomes = [first.unwrap().report, second.unwrap().report];

    let enqueued: usize = outcomes.iter().map(|r| r.enqueued).sum();
    assert_eq!(enqueued, 2);
    assert_eq!(state.uploads().len(), 2);
    assert_eq!(state.creation_count(), 2);
    assert!(outcomes.iter().any(|r| r.outcome == SyncOutcome::Completed));
}

#[tokio::test]
async fn test_wakeup_never_cleans_a_temp_dir_inside_the_source_dir() {
    let (server, _state) = common::start_tus_server().await;
    mount_empty_catalog(&server).await;
    let (_pool, repo) = common::memory_repository().await;
    let root = TempDir::new().unwrap();
    write_photos(&root);
    let old = root.path().join("photos").join("a.jpg");
    std::fs::File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(10 * 24 * 60 * 60))
        .unwrap();
    let config = ConfigBuilder::new()
        .server(server.uri(), common::API_KEY)
        .storage_source_dir(root.path().join("photos"))
        .storage_temp_dir(root.path().join("photos"))
        .build();

    let summary = run_wakeup(&config, &services(&repo), WakeupMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.temp_files_removed, 0);
    assert!(old.exists());
}
