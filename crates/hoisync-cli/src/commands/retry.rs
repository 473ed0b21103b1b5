//! Retry command - Restart failed uploads
//!
//! Failed sessions created for the configured server are resumed from the
//! server's offset. Sessions left over from another host or API key are
//! dropped. The command waits for the retried uploads unless interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use hoisync_core::config::Config;
use hoisync_core::ports::IUploadTransport;
use hoisync_sync::lease::{RunLease, LEASE_TTL};
use hoisync_sync::wakeup::WakeupServices;
use tracing::{info, warn};

use super::{interruptible, load_config, transport, LocalState};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct RetryCommand {
    /// Return after restarting the uploads instead of waiting for them
    #[arg(long)]
    pub no_wait: bool,
}

impl RetryCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let config = load_config(config_path)?;
        let state = LocalState::open(&config).await?;
        let services = state.wakeup_services().await;

        let Some(lease) = RunLease::acquire(Arc::clone(&services.settings), LEASE_TTL)
            .await
            .context("Failed to take the run lease")?
        else {
            let message = "A sync is in progress; try again when it finishes";
            if format.is_json() {
                get_formatter(format).print_json(&serde_json::json!({
                    "success": false,
                    "error": message,
                }));
            } else {
                get_formatter(format).warn(message);
            }
            return Ok(());
        };

        let result = self.retry(&config, &services, format).await;
        lease.release().await;
        result
    }

    async fn retry(
        &self,
        config: &Config,
        services: &WakeupServices,
        format: OutputFormat,
    ) -> Result<()> {
        let formatter = get_formatter(format);
        let shutdown = interruptible(None);
        let transport = transport(config, services, shutdown.clone())?;
        let report = transport
            .retry_failed_uploads()
            .await
            .context("Failed to retry uploads")?;
        info!(
            retried = report.retried.len(),
            cancelled = report.cancelled.len(),
            corrupt_removed = report.corrupt_removed,
            "Failed uploads revalidated"
        );

        if self.no_wait {
            // Pause the workers at their first chunk boundary
            shutdown.cancel();
        }
        transport.wait_idle().await;
        shutdown.cancel();

        let uploaded = transport.prune_completed().await?;
        let remaining = transport.remaining_uploads().await?;
        if let Err(e) = services.uploads.save().await {
            warn!(error = %e, "Failed to save upload progress");
        }

        if format.is_json() {
            let retried: Vec<String> = report.retried.iter().map(ToString::to_string).collect();
            let cancelled: Vec<String> = report.cancelled.iter().map(ToString::to_string).collect();
            formatter.print_json(&serde_json::json!({
                "retried": retried,
                "cancelled": cancelled,
                "corrupt_removed": report.corrupt_removed,
                "uploaded": uploaded,
                "remaining": remaining,
            }));
            return Ok(());
        }

        if report.retried.is_empty() {
            formatter.success("No failed uploads to retry");
        } else {
            formatter.success(&format!("Retried {} upload(s)", report.retried.len()));
        }
        if !report.cancelled.is_empty() {
            formatter.info(&format!(
                "Dropped {} upload(s) created for a different server or API key",
                report.cancelled.len()
            ));
        }
        if report.corrupt_removed > 0 {
            formatter.warn(&format!(
                "Removed {} unreadable upload record(s)",
                report.corrupt_removed
            ));
        }
        formatter.info(&format!("Uploaded: {}", uploaded));
        formatter.info(&format!("Still pending: {}", remaining));

        Ok(())
    }
}
