//! CLI subcommands and the wiring they share

pub mod config;
pub mod enable;
pub mod health;
pub mod retry;
pub mod session;
pub mod status;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hoisync_cache::{DatabasePool, SqliteStateRepository};
use hoisync_core::config::Config;
use hoisync_sync::progress::{ProgressTracker, UPLOADS_TRACKER};
use hoisync_sync::transport::{ChunkedUploadTransport, TransportSettings};
use hoisync_sync::wakeup::WakeupServices;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Loads the configuration at `path` and rejects invalid settings
pub fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path);
    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!(
            "Invalid configuration in {}: {}",
            path.display(),
            details.join("; ")
        );
    }
    info!(config_path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// The opened state database
pub struct LocalState {
    _pool: DatabasePool,
    pub repo: Arc<SqliteStateRepository>,
}

impl LocalState {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = DatabasePool::new(&config.storage.database)
            .await
            .context("Failed to open database")?;
        let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
        Ok(Self { _pool: pool, repo })
    }

    /// Services for a wake-up, with upload progress loaded from the database
    pub async fn wakeup_services(&self) -> WakeupServices {
        let uploads = ProgressTracker::load(UPLOADS_TRACKER, self.repo.clone()).await;
        WakeupServices {
            settings: self.repo.clone(),
            sessions: self.repo.clone(),
            uploads: Arc::new(uploads),
        }
    }
}

/// A transport for the configured server that leaves stored sessions alone
pub fn transport(
    config: &Config,
    services: &WakeupServices,
    shutdown: CancellationToken,
) -> Result<ChunkedUploadTransport> {
    let endpoint = config
        .endpoint()
        .context("No server configured. Run 'hoisync config set-server <host> <key>'")?;
    let transport = ChunkedUploadTransport::new(
        endpoint,
        Arc::clone(&services.sessions),
        Arc::clone(&services.uploads),
        TransportSettings::from_config(&config.upload),
        shutdown,
    )?;
    Ok(transport)
}

/// A token cancelled by Ctrl+C or, when given, after `budget_secs`
pub fn interruptible(budget_secs: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Interrupted, pausing uploads");
                    on_signal.cancel();
                }
            }
            _ = on_signal.cancelled() => {}
        }
    });

    if let Some(seconds) = budget_secs {
        let on_budget = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => {
                    info!(budget_secs = seconds, "Time budget exhausted");
                    on_budget.cancel();
                }
                _ = on_budget.cancelled() => {}
            }
        });
    }

    token
}
