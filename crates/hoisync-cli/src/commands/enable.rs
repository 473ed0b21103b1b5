//! Enable / Disable commands - Toggle background sync
//!
//! The flag is read by the coordinator before every batch and every item,
//! so disabling takes effect during a running sync as well.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use hoisync_core::ports::ISettingsStore;
use tracing::info;

use super::{load_config, LocalState};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct EnableCommand {}

#[derive(Debug, Args)]
pub struct DisableCommand {}

impl EnableCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        set_enabled(config_path, true, format).await
    }
}

impl DisableCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        set_enabled(config_path, false, format).await
    }
}

async fn set_enabled(config_path: &Path, enabled: bool, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let config = load_config(config_path)?;
    let state = LocalState::open(&config).await?;

    state
        .repo
        .set_sync_enabled(enabled)
        .await
        .context("Failed to update sync setting")?;
    info!(enabled, "Sync setting updated");

    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "sync_enabled": enabled,
        }));
    } else if enabled {
        formatter.success("Background sync enabled");
        if config.endpoint().is_err() {
            formatter.warn("No server configured. Run 'hoisync config set-server <host> <key>'.");
        }
    } else {
        formatter.success("Background sync disabled");
    }

    Ok(())
}
