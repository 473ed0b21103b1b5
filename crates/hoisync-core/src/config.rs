//! Configuration module for HoiSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, ServerEndpoint};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for HoiSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Backup server connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, e.g. `https://photos.example.com`. Empty until configured.
    pub host: String,
    /// API key sent as `api_key` query parameter and upload bearer token.
    pub api_key: String,
}

/// Sync coordinator pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items fetched per batch, also the in-flight upload ceiling.
    pub batch_ceiling: usize,
    /// Milliseconds between capacity re-checks while waiting on uploads.
    pub capacity_poll_ms: u64,
    /// Seconds between daemon wake-ups.
    pub wake_interval_secs: u64,
    /// Seconds each wake-up may run before its expiration fires.
    pub run_budget_secs: u64,
}

/// Chunked upload transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each PATCH body (in KiB).
    pub chunk_size_kb: u64,
    /// Maximum sessions transferring at the same time.
    pub max_concurrent: usize,
    /// Attempts per request after the first one.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub retry_base_delay_ms: u64,
}

/// Local storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding settings, progress and sessions.
    pub database: PathBuf,
    /// Directory scanned by the built-in asset source.
    pub source_dir: PathBuf,
    /// Scratch directory for materialized media.
    pub temp_dir: PathBuf,
    /// Files in `temp_dir` older than this many days are deleted.
    pub temp_retention_days: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/hoisync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("hoisync")
            .join("config.yaml")
    }

    /// The configured server identity.
    pub fn endpoint(&self) -> Result<ServerEndpoint, DomainError> {
        ServerEndpoint::new(&self.server.host, &self.server.api_key)
    }
}

impl SyncConfig {
    pub fn capacity_poll_interval(&self) -> Duration {
        Duration::from_millis(self.capacity_poll_ms)
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

impl UploadConfig {
    pub fn chunk_size_bytes(&self) -> usize {
        (self.chunk_size_kb as usize) * 1024
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_ceiling: 20,
            capacity_poll_ms: 1000,
            wake_interval_secs: 900,
            run_budget_secs: 25,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: 5 * 1024,
            max_concurrent: 4,
            max_retries: 5,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("hoisync");
        Self {
            database: data_dir.join("hoisync.db"),
            source_dir: dirs::picture_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join("Pictures")))
                .unwrap_or_else(|| PathBuf::from("Pictures")),
            temp_dir: std::env::temp_dir().join("hoisync"),
            temp_retention_days: 2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.batch_ceiling"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. An unconfigured
    /// server (both fields empty) is valid; a half-configured one is not.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- server ---
        let host_set = !self.server.host.trim().is_empty();
        let key_set = !self.server.api_key.trim().is_empty();
        if host_set || key_set {
            if let Err(e) = self.endpoint() {
                errors.push(ValidationError {
                    field: "server".into(),
                    message: e.to_string(),
                });
            }
        }

        // --- sync ---
        if self.sync.batch_ceiling == 0 {
            errors.push(ValidationError {
                field: "sync.batch_ceiling".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.capacity_poll_ms == 0 {
            errors.push(ValidationError {
                field: "sync.capacity_poll_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.wake_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.wake_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.run_budget_secs == 0 {
            errors.push(ValidationError {
                field: "sync.run_budget_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- upload ---
        if self.upload.chunk_size_kb == 0 {
            errors.push(ValidationError {
                field: "upload.chunk_size_kb".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.upload.max_concurrent == 0 || self.upload.max_concurrent > 32 {
            errors.push(ValidationError {
                field: "upload.max_concurrent".into(),
                message: "must be in range 1..=32".into(),
            });
        }

        // --- storage ---
        if self.storage.temp_retention_days == 0 {
            errors.push(ValidationError {
                field: "storage.temp_retention_days".into(),
                message: "must be greater than 0".into(),
            });
        }
        // Old files in temp_dir are deleted, so it must never contain media
        if self.storage.temp_dir_overlaps_source() {
            errors.push(ValidationError {
                field: "storage.temp_dir".into(),
                message: format!(
                    "must not overlap storage.source_dir ({})",
                    self.storage.source_dir.display()
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

impl StorageConfig {
    /// True when `temp_dir` and `source_dir` are the same directory or one
    /// is inside the other
    pub fn temp_dir_overlaps_source(&self) -> bool {
        paths_overlap(&self.temp_dir, &self.source_dir)
    }
}

fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a.starts_with(&b) || b.starts_with(&a)
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use hoisync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .server("https://photos.example.com", "my-key")
///     .sync_batch_ceiling(10)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- server ---

    pub fn server(mut self, host: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self.config.server.api_key = api_key.into();
        self
    }

    // --- sync ---

    pub fn sync_batch_ceiling(mut self, n: usize) -> Self {
        self.config.sync.batch_ceiling = n;
        self
    }

    pub fn sync_capacity_poll_ms(mut self, ms: u64) -> Self {
        self.config.sync.capacity_poll_ms = ms;
        self
    }

    pub fn sync_wake_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.wake_interval_secs = seconds;
        self
    }

    pub fn sync_run_budget_secs(mut self, seconds: u64) -> Self {
        self.config.sync.run_budget_secs = seconds;
        self
    }

    // --- upload ---

    pub fn upload_chunk_size_kb(mut self, kb: u64) -> Self {
        self.config.upload.chunk_size_kb = kb;
        self
    }

    pub fn upload_max_concurrent(mut self, n: usize) -> Self {
        self.config.upload.max_concurrent = n;
        self
    }

    pub fn upload_max_retries(mut self, n: u32) -> Self {
        self.config.upload.max_retries = n;
        self
    }

    pub fn upload_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.upload.retry_base_delay_ms = ms;
        self
    }

    // --- storage ---

    pub fn storage_database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    pub fn storage_source_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.source_dir = path;
        self
    }

    pub fn storage_temp_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.temp_dir = path;
        self
    }

    pub fn storage_temp_retention_days(mut self, days: u32) -> Self {
        self.config.storage.temp_retention_days = days;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
