//! HoiSync CLI - Command-line interface for HoiSync
//!
//! Provides commands for:
//! - Enabling and disabling background sync
//! - Running a sync now, or a full re-scan
//! - Retrying failed uploads and managing upload sessions
//! - Checking server health and sync progress
//! - Viewing and editing configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hoisync_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand,
    enable::{DisableCommand, EnableCommand},
    health::HealthCommand,
    retry::RetryCommand,
    session::SessionCommand,
    status::StatusCommand,
    sync::SyncCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "hoisync", version, about = "Photo and video backup to your own server")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Turn background sync on
    Enable(EnableCommand),
    /// Turn background sync off
    Disable(DisableCommand),
    /// Upload new photos and videos now
    Sync(SyncCommand),
    /// Retry uploads that previously failed
    Retry(RetryCommand),
    /// Check that the server is reachable
    Health(HealthCommand),
    /// Show sync and upload progress
    Status(StatusCommand),
    /// Cancel or remove individual upload sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Enable(cmd) => cmd.execute(&config_path, format).await,
        Commands::Disable(cmd) => cmd.execute(&config_path, format).await,
        Commands::Sync(cmd) => cmd.execute(&config_path, format).await,
        Commands::Retry(cmd) => cmd.execute(&config_path, format).await,
        Commands::Health(cmd) => cmd.execute(&config_path, format).await,
        Commands::Status(cmd) => cmd.execute(&config_path, format).await,
        Commands::Session(cmd) => cmd.execute(&config_path, format).await,
        Commands::Config(cmd) => cmd.execute(&config_path, format).await,
    }
}
