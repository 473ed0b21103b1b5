//! Config command - View and manage HoiSync configuration
//!
//! Provides the `hoisync config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Points HoiSync at a server with `set-server <host> <key>`
//! 3. Sets individual configuration values via dot-notation keys
//! 4. Validates the configuration file and reports errors

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use hoisync_core::config::Config;
use tracing::info;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set the backup server and its API key
    SetServer {
        /// Base URL, e.g. https://photos.example.com
        host: String,
        /// API key issued by the server
        api_key: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.batch_ceiling")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("server.host", "Backup server base URL"),
    ("server.api_key", "Backup server API key"),
    ("sync.batch_ceiling", "Items per batch and in-flight upload limit"),
    ("sync.capacity_poll_ms", "Milliseconds between capacity checks"),
    ("sync.wake_interval_secs", "Seconds between daemon wake-ups"),
    ("sync.run_budget_secs", "Seconds each wake-up may run"),
    ("upload.chunk_size_kb", "Upload chunk size (KiB)"),
    ("upload.max_concurrent", "Parallel uploads (1-32)"),
    ("upload.max_retries", "Retries per request"),
    ("upload.retry_base_delay_ms", "Base backoff delay (ms)"),
    ("storage.database", "State database path"),
    ("storage.source_dir", "Directory scanned for photos and videos"),
    ("storage.temp_dir", "Scratch directory"),
    ("storage.temp_retention_days", "Days before scratch files are deleted"),
    ("logging.level", "trace|debug|info|warn|error"),
];

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, config_path: &Path, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(config_path, format),
            ConfigCommand::SetServer { host, api_key } => {
                let updates = [("server.host", host.as_str()), ("server.api_key", api_key.as_str())];
                execute_set(config_path, &updates, format)
            }
            ConfigCommand::Set { key, value } => {
                execute_set(config_path, &[(key.as_str(), value.as_str())], format)
            }
            ConfigCommand::Validate => execute_validate(config_path, format),
        }
    }
}

fn execute_show(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut config = Config::load_or_default(config_path);
    if !config.server.api_key.is_empty() {
        config.server.api_key = "********".to_string();
    }

    info!(config_path = %config_path.display(), "Showing configuration");

    if format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
    } else {
        formatter.success(&format!("Configuration ({})", config_path.display()));
        formatter.info("");

        let yaml =
            serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
    }

    Ok(())
}

/// Applies every update, validates, and saves only if the result is valid
fn execute_set(config_path: &Path, updates: &[(&str, &str)], format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let mut config = Config::load_or_default(config_path);

    for (key, value) in updates {
        info!(key = %key, "Setting configuration value");
        if let Err(e) = apply_config_value(&mut config, key, value) {
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "error": e.to_string(),
                }));
            } else {
                formatter.error(&format!("Failed to set '{}': {}", key, e));
                print_supported_keys(&*formatter);
            }
            return Ok(());
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "errors": messages,
            }));
        } else {
            formatter.error(&format!("Invalid configuration: {}", messages.join("; ")));
        }
        return Ok(());
    }

    config
        .save(config_path)
        .context("Failed to write configuration file")?;

    let keys: Vec<&str> = updates.iter().map(|(key, _)| *key).collect();
    if format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "keys": keys,
            "config_path": config_path.display().to_string(),
        }));
    } else {
        formatter.success(&format!("Updated {}", keys.join(", ")));
        formatter.info(&format!("Saved to {}", config_path.display()));
    }
    Ok(())
}

fn execute_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);

    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            let message = if config_path.exists() {
                format!("Failed to parse configuration: {}", e)
            } else {
                "Configuration file not found. Using defaults.".to_string()
            };
            if format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": config_path.display().to_string(),
                    "errors": [message],
                }));
            } else {
                formatter.error(&message);
                formatter.info(&format!("File: {}", config_path.display()));
            }
            return Ok(());
        }
    };

    info!(config_path = %config_path.display(), "Validating configuration");
    let errors = config.validate();

    if format.is_json() {
        let error_strings: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": config_path.display().to_string(),
            "errors": error_strings,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", config_path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", config_path.display()));
        formatter.info("");
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }

    Ok(())
}

fn print_supported_keys(formatter: &dyn OutputFormatter) {
    formatter.info("");
    formatter.info("Supported keys:");
    for (key, description) in SUPPORTED_KEYS {
        formatter.info(&format!("  {:<30} - {}", key, description));
    }
}

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- server ---
        "server.host" => config.server.host = value.trim_end_matches('/').to_string(),
        "server.api_key" => config.server.api_key = value.to_string(),

        // --- sync ---
        "sync.batch_ceiling" => {
            config.sync.batch_ceiling = value
                .parse::<usize>()
                .context("Expected a positive integer for sync.batch_ceiling")?;
        }
        "sync.capacity_poll_ms" => {
            config.sync.capacity_poll_ms = value
                .parse::<u64>()
                .context("Expected a positive integer for sync.capacity_poll_ms")?;
        }
        "sync.wake_interval_secs" => {
            config.sync.wake_interval_secs = value
                .parse::<u64>()
                .context("Expected a positive integer for sync.wake_interval_secs")?;
        }
        "sync.run_budget_secs" => {
            config.sync.run_budget_secs = value
                .parse::<u64>()
                .context("Expected a positive integer for sync.run_budget_secs")?;
        }

        // --- upload ---
        "upload.chunk_size_kb" => {
            config.upload.chunk_size_kb = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }
        "upload.max_concurrent" => {
            config.upload.max_concurrent = value
                .parse::<usize>()
                .context("Expected a positive integer")?;
        }
        "upload.max_retries" => {
            config.upload.max_retries = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }
        "upload.retry_base_delay_ms" => {
            config.upload.retry_base_delay_ms = value
                .parse::<u64>()
                .context("Expected a positive integer")?;
        }

        // --- storage ---
        "storage.database" => config.storage.database = PathBuf::from(value),
        "storage.source_dir" => config.storage.source_dir = PathBuf::from(value),
        "storage.temp_dir" => config.storage.temp_dir = PathBuf::from(value),
        "storage.temp_retention_days" => {
            config.storage.temp_retention_days = value
                .parse::<u32>()
                .context("Expected a positive integer")?;
        }

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),

        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}
