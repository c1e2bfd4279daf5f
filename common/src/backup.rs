// Backup manager: captures pre-images of documents before an update touches them
//
// The full capture for a batch is fetched and persisted before the caller may
// issue a single mutating call. Any failure aborts the capture as a whole.

use crate::errors::BackupError;
use crate::index::IndexGateway;
use crate::models::{BackupSnapshot, UpdateTarget};
use crate::validation::{key_to_string, DocumentBatch};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};
use uuid::Uuid;

/// BackupManager writes write-once snapshot files under the backup root
pub struct BackupManager {
    backup_root: PathBuf,
    gateway: Arc<dyn IndexGateway>,
}

impl BackupManager {
    pub fn new(backup_root: impl Into<PathBuf>, gateway: Arc<dyn IndexGateway>) -> Self {
        Self {
            backup_root: backup_root.into(),
            gateway,
        }
    }

    /// Snapshot file for one target of one run:
    /// `<backup_root>/<run_date>/<job_id>/<index_name>_<run_id>.json`
    pub fn snapshot_path(
        &self,
        job_id: &str,
        run_id: Uuid,
        run_date: NaiveDate,
        index_name: &str,
    ) -> PathBuf {
        self.backup_root
            .join(run_date.format("%Y-%m-%d").to_string())
            .join(job_id)
            .join(format!("{}_{}.json", index_name, run_id))
    }

    /// Fetch and persist the pre-image of every document in `batch`.
    /// Returns the snapshot file, or None for an empty batch.
    #[instrument(skip(self, target, batch), fields(index_name = %target.index_name, documents = batch.len()))]
    pub async fn capture(
        &self,
        job_id: &str,
        run_id: Uuid,
        run_date: NaiveDate,
        target: &UpdateTarget,
        batch: &DocumentBatch,
    ) -> Result<Option<PathBuf>, BackupError> {
        if batch.is_empty() {
            return Ok(None);
        }

        let snapshots = self.collect_snapshots(run_date, target, batch).await?;
        let path = self.snapshot_path(job_id, run_id, run_date, &target.index_name);
        persist(&path, &snapshots).await?;

        info!(
            snapshots = snapshots.len(),
            backup_file = %path.display(),
            "Backed up documents before update"
        );
        Ok(Some(path))
    }

    async fn collect_snapshots(
        &self,
        run_date: NaiveDate,
        target: &UpdateTarget,
        batch: &DocumentBatch,
    ) -> Result<Vec<BackupSnapshot>, BackupError> {
        let ids = batch.document_ids();
        let fields = batch.updated_fields();

        let current = self
            .gateway
            .fetch(&target.index_name, &target.key_field, &ids, &fields)
            .await
            .map_err(|e| BackupError::FetchFailed {
                index_name: target.index_name.clone(),
                reason: e.to_string(),
            })?;

        let by_id: HashMap<String, Map<String, Value>> = current
            .into_iter()
            .filter_map(|doc| {
                let id = doc.get(&target.key_field).and_then(key_to_string)?;
                Some((id, doc))
            })
            .collect();

        batch
            .documents
            .iter()
            .map(|update| {
                let document_id = update
                    .get(&target.key_field)
                    .and_then(key_to_string)
                    .unwrap_or_default();

                let existing =
                    by_id
                        .get(&document_id)
                        .ok_or_else(|| BackupError::DocumentNotFound {
                            index_name: target.index_name.clone(),
                            document_id: document_id.clone(),
                        })?;

                // Only the fields this update sets; absent fields are captured as null
                let fields = update
                    .keys()
                    .filter(|field| **field != target.key_field)
                    .map(|field| {
                        let prior = existing.get(field).cloned().unwrap_or(Value::Null);
                        (field.clone(), prior)
                    })
                    .collect();

                Ok(BackupSnapshot {
                    index_name: target.index_name.clone(),
                    document_id,
                    run_date,
                    fields,
                })
            })
            .collect()
    }
}

// create_new: an existing snapshot is never rewritten
async fn persist(path: &Path, snapshots: &[BackupSnapshot]) -> Result<(), BackupError> {
    let failed = |e: std::io::Error| BackupError::PersistFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let content = serde_json::to_vec_pretty(snapshots).map_err(|e| BackupError::PersistFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(failed)?;
    file.write_all(&content).await.map_err(failed)?;
    file.flush().await.map_err(failed)?;
    file.sync_all().await.map_err(failed)
}
