// Configuration management with layered configuration (defaults, file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scheduler process settings. The job schedule itself lives in a separate
/// JSON file managed by [`crate::storage::ScheduleStore`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub paths: PathsConfig,
    pub index: IndexConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub schedule_file: PathBuf,
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
}

impl PathsConfig {
    /// Root of the per-run work directories
    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("run_history.json")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            schedule_file: PathBuf::from("config/ingestion_schedule.json"),
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("backup"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// External index-mutation tool
    pub tool: String,
    /// Base URL of the index read API, one collection per path segment
    pub query_url: String,
    pub request_timeout_seconds: u64,
    /// Most ids per pre-image read, kept below the index's boolean clause limit
    pub fetch_batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tool: "p3-solr-insert".to_string(),
            query_url: "https://www.bv-brc.org/api".to_string(),
            request_timeout_seconds: 60,
            fetch_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Machine-local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.paths.schedule_file.as_os_str().is_empty() {
            return Err("paths.schedule_file cannot be empty".to_string());
        }
        if self.paths.data_dir.as_os_str().is_empty() {
            return Err("paths.data_dir cannot be empty".to_string());
        }
        if self.paths.backup_dir.as_os_str().is_empty() {
            return Err("paths.backup_dir cannot be empty".to_string());
        }

        if self.index.tool.trim().is_empty() {
            return Err("index.tool cannot be empty".to_string());
        }
        if self.index.query_url.trim().is_empty() {
            return Err("index.query_url cannot be empty".to_string());
        }
        if self.index.request_timeout_seconds == 0 {
            return Err("index.request_timeout_seconds must be greater than 0".to_string());
        }
        if self.index.fetch_batch_size == 0 {
            return Err("index.fetch_batch_size must be greater than 0".to_string());
        }

        Ok(())
    }
}
