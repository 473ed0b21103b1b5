//! Session commands - Manage individual upload sessions
//!
//! - `cancel` marks an unfinished session failed so a later `retry` can
//!   pick it up again
//! - `remove` forgets a session entirely, including its partial upload on
//!   the server

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Subcommand;
use hoisync_core::domain::SessionId;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{load_config, transport, LocalState};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Stop an unfinished upload and mark it failed
    Cancel {
        /// Session id as shown by `hoisync status`
        id: String,
    },
    /// Delete an upload session and its server-side data
    Remove {
        /// Session id as shown by `hoisync status`
        id: String,
    },
}

impl SessionCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let (action, raw_id) = match self {
            SessionCommand::Cancel { id } => ("cancel", id),
            SessionCommand::Remove { id } => ("remove", id),
        };
        let id = SessionId::from_str(raw_id)
            .with_context(|| format!("Invalid session id '{}'", raw_id))?;

        let config = load_config(config_path)?;
        let state = LocalState::open(&config).await?;
        let services = state.wakeup_services().await;
        let transport = transport(&config, &services, CancellationToken::new())?;

        let changed = match self {
            SessionCommand::Cancel { .. } => transport.cancel(&id).await?,
            SessionCommand::Remove { .. } => {
                transport.remove_cache(&id).await?;
                true
            }
        };
        if let Err(e) = services.uploads.save().await {
            warn!(error = %e, "Failed to save upload progress");
        }

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "action": action,
                "session_id": id.to_string(),
                "changed": changed,
            }));
        } else if !changed {
            formatter.warn(&format!("Session {} has nothing left to cancel", id));
        } else if action == "cancel" {
            formatter.success(&format!("Cancelled session {}", id));
            formatter.info("Run 'hoisync retry' to upload it again.");
        } else {
            formatter.success(&format!("Removed session {}", id));
        }

        Ok(())
    }
}
