// Schedule store: loads, validates and atomically persists the job schedule

use crate::errors::{ConfigError, StorageError};
use crate::models::ScheduleConfig;
use crate::storage::atomic_write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument};

/// ScheduleStore owns the on-disk location of the schedule file
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the schedule
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<ScheduleConfig, ConfigError> {
        debug!("Reading schedule file");

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::Unreadable {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        let config = parse(&raw).map_err(|e| match e {
            ConfigError::Malformed { reason, .. } => ConfigError::Malformed {
                path: self.path.display().to_string(),
                reason,
            },
            other => other,
        })?;

        info!(jobs = config.jobs.len(), "Schedule loaded");
        Ok(config)
    }

    /// Persist the full schedule, replacing the previous file atomically
    #[instrument(skip(self, config), fields(path = %self.path.display()))]
    pub async fn save(&self, config: &ScheduleConfig) -> Result<(), StorageError> {
        let mut content = serde_json::to_vec_pretty(config)?;
        content.push(b'\n');
        atomic_write(&self.path, &content).await?;
        debug!("Schedule saved");
        Ok(())
    }
}

/// Parse and validate schedule JSON
pub fn parse(raw: &str) -> Result<ScheduleConfig, ConfigError> {
    let config: ScheduleConfig =
        serde_json::from_str(raw).map_err(|e| ConfigError::Malformed {
            path: String::new(),
            reason: e.to_string(),
        })?;
    validate(&config)?;
    Ok(config)
}

/// Enforce the structural invariants serde cannot express
pub fn validate(config: &ScheduleConfig) -> Result<(), ConfigError> {
    for (job_id, entry) in &config.jobs {
        let invalid = |reason: String| ConfigError::InvalidJob {
            job_id: job_id.clone(),
            reason,
        };

        if !is_single_component(job_id) {
            return Err(invalid(
                "job id must be a plain directory name without separators or dot segments"
                    .to_string(),
            ));
        }

        if entry.executable_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingExecutable(job_id.clone()));
        }
        if entry.interval_days == 0 {
            return Err(invalid("interval_days must be greater than 0".to_string()));
        }

        for target in &entry.insert_targets {
            if target.index_name.trim().is_empty() {
                return Err(invalid("insert target has an empty index_name".to_string()));
            }
            if target.key_field.trim().is_empty() {
                return Err(invalid(format!(
                    "insert target {} has an empty key",
                    target.index_name
                )));
            }
        }

        for target in &entry.update_targets {
            if target.index_name.trim().is_empty() {
                return Err(invalid("update target has an empty index_name".to_string()));
            }
            if target.key_field.trim().is_empty() {
                return Err(invalid(format!(
                    "update target {} has an empty key",
                    target.index_name
                )));
            }
            if target.allowed_fields.contains(&target.key_field) {
                return Err(invalid(format!(
                    "update target {} lists its key '{}' as an updatable field",
                    target.index_name, target.key_field
                )));
            }
        }
    }
    Ok(())
}

// Job ids name per-run directories, so each must stay one path segment
fn is_single_component(job_id: &str) -> bool {
    if job_id.trim().is_empty() || job_id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(job_id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name.to_str() == Some(job_id)
    )
}
