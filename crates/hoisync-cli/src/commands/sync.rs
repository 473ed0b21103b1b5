//! Sync command - Upload new photos and videos now
//!
//! Provides the `hoisync sync` CLI command which:
//! 1. Loads configuration and opens the state database
//! 2. Runs one wake-up, the same one the daemon runs on its timer
//! 3. Stops discovery and pauses uploads on Ctrl+C or when `--budget` runs out
//! 4. Displays what was discovered, enqueued and uploaded

use std::path::Path;

use anyhow::Result;
use clap::Args;
use hoisync_sync::coordinator::SyncOutcome;
use hoisync_sync::wakeup::{run_wakeup, WakeupMode, WakeupSummary};

use super::{interruptible, load_config, LocalState};
use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Forget the sync watermark and re-scan every asset
    #[arg(long)]
    pub rescan: bool,

    /// Seconds before the run pauses (default: until done or Ctrl+C)
    #[arg(long)]
    pub budget: Option<u64>,
}

impl SyncCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        if config.endpoint().is_err() {
            formatter.error("No server configured. Run 'hoisync config set-server <host> <key>'.");
            return Ok(());
        }

        let state = LocalState::open(&config).await?;
        let services = state.wakeup_services().await;
        let mode = if self.rescan {
            WakeupMode::FullRescan
        } else {
            WakeupMode::Incremental
        };

        if !format.is_json() {
            formatter.info(&format!(
                "Scanning {}{}",
                config.storage.source_dir.display(),
                if self.rescan { " (full re-scan)" } else { "" }
            ));
        }

        let expiration = interruptible(self.budget);
        let summary = run_wakeup(&config, &services, mode, &expiration).await?;
        expiration.cancel();

        if format.is_json() {
            formatter.print_json(&serde_json::to_value(&summary)?);
        } else {
            print_summary(&summary, &*formatter);
        }

        Ok(())
    }
}

/// Human-readable explanation of why a run ended
pub fn describe_outcome(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::Completed => "All assets processed",
        SyncOutcome::Disabled => "Sync is disabled. Run 'hoisync enable' to turn it on.",
        SyncOutcome::Unauthorized => "Access to the media library was not granted",
        SyncOutcome::Expired => "Time ran out; the next run continues where this one stopped",
        SyncOutcome::Deferred => "Server catalog unavailable; the remaining assets are retried next run",
        SyncOutcome::AlreadyRunning => "Another sync is already running",
    }
}

fn print_summary(summary: &WakeupSummary, formatter: &dyn OutputFormatter) {
    let report = &summary.report;
    match report.outcome {
        SyncOutcome::Completed => formatter.success(describe_outcome(report.outcome)),
        outcome => formatter.warn(describe_outcome(outcome)),
    }
    formatter.info("");
    formatter.info(&format!("Discovered:       {}", report.discovered));
    formatter.info(&format!("Enqueued:         {}", report.enqueued));
    formatter.info(&format!("Already on server: {}", report.skipped_existing));
    if report.unresolved > 0 {
        formatter.info(&format!("Unreadable:       {}", report.unresolved));
    }
    if summary.resumed > 0 {
        formatter.info(&format!("Resumed:          {}", summary.resumed));
    }
    formatter.info(&format!("Uploaded:         {}", summary.pruned));
    formatter.info(&format!("Still pending:    {}", summary.uploads_remaining));
}
