//! Health command - Check that the configured server answers

use std::path::Path;

use anyhow::Result;
use clap::Args;
use hoisync_api::StorageClient;
use hoisync_core::ports::IRemoteCatalog;
use tracing::info;

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct HealthCommand {}

impl HealthCommand {
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;

        let endpoint = match config.endpoint() {
            Ok(endpoint) => endpoint,
            Err(_) => {
                formatter
                    .error("No server configured. Run 'hoisync config set-server <host> <key>'.");
                return Ok(());
            }
        };

        let client = StorageClient::from_endpoint(&endpoint);
        let healthy = client.health_check().await;
        info!(host = %endpoint.host(), healthy, "Health check finished");

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "host": endpoint.host(),
                "healthy": healthy,
            }));
        } else if healthy {
            formatter.success(&format!("Server {} is reachable", endpoint.host()));
        } else {
            formatter.error(&format!("Server {} is not responding", endpoint.host()));
        }

        Ok(())
    }
}
