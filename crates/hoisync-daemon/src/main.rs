//! HoiSync Daemon - Periodic background sync
//!
//! This binary plays the host's "background refresh" role:
//! - Wakes up every `sync.wake_interval_secs`
//! - Gives each wake-up `sync.run_budget_secs` before its expiration fires
//! - Persists upload progress with a debounced writer
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Each wake-up gets a child of the shutdown token, cancelled by a budget
//! timer. Cancelling it stops discovery and pauses uploads at a chunk
//! boundary; the next wake-up resumes them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hoisync_cache::{DatabasePool, SqliteStateRepository};
use hoisync_core::config::Config;
use hoisync_sync::progress::{ProgressTracker, UPLOADS_TRACKER};
use hoisync_sync::wakeup::{run_wakeup, WakeupMode, WakeupServices};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Delay between a progress change and its write to the database
const PROGRESS_DEBOUNCE: Duration = Duration::from_secs(2);

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the long-lived state shared by all wake-ups
struct DaemonService {
    config: Config,
    /// Keeps the pool alive for the daemon's lifetime
    _db_pool: DatabasePool,
    services: WakeupServices,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and loads the persisted upload progress
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_pool = DatabasePool::new(&config.storage.database)
            .await
            .context("Failed to open database")?;
        let repo = Arc::new(SqliteStateRepository::new(db_pool.pool().clone()));
        let uploads = Arc::new(ProgressTracker::load(UPLOADS_TRACKER, repo.clone()).await);
        info!(
            database = %config.storage.database.display(),
            tracked_uploads = uploads.len(),
            "State loaded"
        );

        Ok(Self {
            services: WakeupServices {
                settings: repo.clone(),
                sessions: repo,
                uploads,
            },
            config,
            _db_pool: db_pool,
            shutdown,
        })
    }

    /// Runs wake-ups until shutdown
    async fn run(&self) -> Result<()> {
        let writer = self
            .services
            .uploads
            .spawn_writer(PROGRESS_DEBOUNCE, self.shutdown.clone());

        let wake_interval = self.config.sync.wake_interval();
        info!(
            wake_interval_secs = wake_interval.as_secs(),
            run_budget_secs = self.config.sync.run_budget_secs,
            "Starting wake-up loop"
        );

        let mut interval = tokio::time::interval(wake_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
            self.wake().await;
        }

        if let Err(e) = writer.await {
            warn!(error = %e, "Progress writer task failed");
        }
        info!("Wake-up loop terminated");
        Ok(())
    }

    /// One budgeted wake-up; failures are logged and retried next tick
    async fn wake(&self) {
        if self.config.endpoint().is_err() {
            warn!("Server not configured. Run 'hoisync config set-server <host> <key>'.");
            return;
        }

        let expiration = self.shutdown.child_token();
        let budget = self.config.sync.run_budget();
        let timer = {
            let expiration = expiration.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(budget) => {
                        info!(budget_secs = budget.as_secs(), "Run budget exhausted");
                        expiration.cancel();
                    }
                    _ = expiration.cancelled() => {}
                }
            })
        };

        match run_wakeup(&self.config, &self.services, WakeupMode::Incremental, &expiration).await {
            Ok(summary) => info!(
                outcome = ?summary.report.outcome,
                discovered = summary.report.discovered,
                enqueued = summary.report.enqueued,
                skipped_existing = summary.report.skipped_existing,
                uploads_remaining = summary.uploads_remaining,
                "Wake-up completed"
            ),
            Err(e) => error!(error = %format!("{e:#}"), "Wake-up failed"),
        }

        expiration.cancel();
        let _ = timer.await;
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

/// Loads the configuration file and rejects invalid settings
fn load_config() -> Result<Config> {
    let path = Config::default_path();
    let config = Config::load_or_default(&path);
    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!(
            "Invalid configuration in {}: {}",
            path.display(),
            details.join("; ")
        );
    }
    Ok(config)
}

/// `RUST_LOG` when set, otherwise `logging.level`
fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured_filter(config))
}

fn configured_filter(config: &Config) -> EnvFilter {
    EnvFilter::new(&config.logging.level)
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config))
        .with_target(true)
        .init();

    info!(
        config_path = %Config::default_path().display(),
        "HoiSync daemon starting (hoisyncd)"
    );

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("HoiSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "HoiSync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
