//! Configuration loading for memory-mesh.
//!
//! Layered precedence: built-in defaults, then the config file
//! (~/.config/memory-mesh/config.toml), then environment variables
//! with the MESH_ prefix. CLI layers are external collaborators and
//! apply their own overrides after loading.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::MemoryError;

/// Thresholds and bounds for duplicate detection.
///
/// Dedup is always on: it is the gate that keeps a scope free of
/// duplicate records, not an optional optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Vector matches below this floor are reported as no-match.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Vector matches at or above this score are merged instead of stored.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f32,

    /// Shortest content accepted at the ingestion boundary.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Longest content accepted at the ingestion boundary.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Expected embedding dimension; mismatched embeddings skip the
    /// vector signal rather than failing the write.
    #[serde(default)]
    pub embedding_dimension: Option<usize>,
}

fn default_similarity_floor() -> f32 {
    0.80
}

fn default_merge_threshold() -> f32 {
    0.95
}

fn default_min_content_length() -> usize {
    1
}

fn default_max_content_length() -> usize {
    65_536
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            merge_threshold: default_merge_threshold(),
            min_content_length: default_min_content_length(),
            max_content_length: default_max_content_length(),
            embedding_dimension: None,
        }
    }
}

impl DedupConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err(format!(
                "similarity_floor must be 0.0-1.0, got {}",
                self.similarity_floor
            ));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(format!(
                "merge_threshold must be 0.0-1.0, got {}",
                self.merge_threshold
            ));
        }
        if self.merge_threshold < self.similarity_floor {
            return Err(format!(
                "merge_threshold ({}) must be >= similarity_floor ({})",
                self.merge_threshold, self.similarity_floor
            ));
        }
        if self.min_content_length == 0 || self.min_content_length > self.max_content_length {
            return Err(format!(
                "content length bounds invalid: min {} max {}",
                self.min_content_length, self.max_content_length
            ));
        }
        Ok(())
    }
}

/// Event publisher channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Per-subscriber channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum time publish may wait on one subscriber before dropping
    /// the event for that subscriber.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_publish_timeout() -> u64 {
    50
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be > 0".to_string());
        }
        if self.publish_timeout_ms == 0 {
            return Err("publish_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Undo ledger retention and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Days an entry stays undoable.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Attempts before an undo is reported as failed.
    #[serde(default = "default_max_undo_attempts")]
    pub max_undo_attempts: u32,
}

fn default_retention_days() -> i64 {
    7
}

fn default_max_undo_attempts() -> u32 {
    3
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_undo_attempts: default_max_undo_attempts(),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retention_days <= 0 {
            return Err(format!(
                "retention_days must be > 0, got {}",
                self.retention_days
            ));
        }
        if self.max_undo_attempts == 0 {
            return Err("max_undo_attempts must be > 0".to_string());
        }
        Ok(())
    }
}

/// Background maintenance job schedules (6-field cron expressions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Undo ledger garbage collection (default: daily at 03:00 UTC).
    #[serde(default = "default_undo_gc_cron")]
    pub undo_gc_cron: String,

    /// Expired-memory sweep (default: daily at 03:30 UTC).
    #[serde(default = "default_ttl_sweep_cron")]
    pub ttl_sweep_cron: String,

    /// Grace period for jobs to finish during shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_undo_gc_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_ttl_sweep_cron() -> String {
    "0 30 3 * * *".to_string()
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            undo_gc_cron: default_undo_gc_cron(),
            ttl_sweep_cron: default_ttl_sweep_cron(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "memory-mesh")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            dedup: DedupConfig::default(),
            publisher: PublisherConfig::default(),
            ledger: LedgerConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/memory-mesh/config.toml)
    /// 3. Caller-specified config file (optional)
    /// 4. Environment variables (MESH_*)
    pub fn load(config_path: Option<&str>) -> Result<Self, MemoryError> {
        let config_dir = ProjectDirs::from("", "", "memory-mesh")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| MemoryError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| MemoryError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("MESH")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| MemoryError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| MemoryError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), MemoryError> {
        self.dedup.validate().map_err(MemoryError::Config)?;
        self.publisher.validate().map_err(MemoryError::Config)?;
        self.ledger.validate().map_err(MemoryError::Config)?;
        Ok(())
    }

    /// Expand ~ in db_path to the actual home directory.
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
