// Run history ledger: append-only audit log of job attempts

use crate::errors::StorageError;
use crate::models::{RunRecord, RunStatus};
use crate::storage::atomic_write;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// HistoryLedger stores RunRecords as a JSON array in a single file.
/// Records are only ever appended; existing entries are never modified.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    path: PathBuf,
}

impl HistoryLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in append order. A missing ledger is empty.
    pub async fn records(&self) -> Result<Vec<RunRecord>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::FileSystemError(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Append one record
    #[instrument(skip(self, record), fields(job_id = %record.job_id, status = ?record.status))]
    pub async fn append(&self, record: &RunRecord) -> Result<(), StorageError> {
        let mut history = match self.records().await {
            Ok(history) => history,
            Err(StorageError::InvalidJson(reason)) => {
                self.quarantine(&reason).await?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        history.push(record.clone());

        let mut content = serde_json::to_vec_pretty(&history)?;
        content.push(b'\n');
        atomic_write(&self.path, &content).await?;

        debug!(entries = history.len(), "Run record appended");
        Ok(())
    }

    /// Records for one job, oldest first
    pub async fn records_for(&self, job_id: &str) -> Result<Vec<RunRecord>, StorageError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .collect())
    }

    /// Most recent successful record for a job
    pub async fn last_success(&self, job_id: &str) -> Result<Option<RunRecord>, StorageError> {
        Ok(self
            .records_for(job_id)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.status == RunStatus::Succeeded))
    }

    // Corrupt history is moved aside rather than overwritten
    async fn quarantine(&self, reason: &str) -> Result<(), StorageError> {
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.f")));
        let aside = PathBuf::from(aside);

        warn!(
            path = %self.path.display(),
            moved_to = %aside.display(),
            reason = reason,
            "Run history is corrupt, starting a new ledger"
        );

        tokio::fs::rename(&self.path, &aside).await.map_err(|e| {
            StorageError::FileSystemError(format!(
                "Failed to move corrupt history {} aside: {}",
                self.path.display(),
                e
            ))
        })
    }
}
