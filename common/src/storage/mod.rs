// Storage module for the schedule file and the run ledger
// Both are small JSON documents replaced atomically on every write

pub mod history;
pub mod schedule_store;

pub use history::HistoryLedger;
pub use schedule_store::ScheduleStore;

use crate::errors::StorageError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Write `content` to `path` through a sibling temp file and a rename, so
/// readers observe either the previous file or the new one, never a mix.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::FileSystemError(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path);
    let mut file = tokio::fs::File::create(&temp_path).await.map_err(|e| {
        StorageError::FileSystemError(format!(
            "Failed to create temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    let written = async {
        file.write_all(content).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(StorageError::FileSystemError(format!(
            "Failed to write temp file {}: {}",
            temp_path.display(),
            e
        )));
    }
    drop(file);

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        StorageError::FileSystemError(format!(
            "Failed to replace {} with {}: {}",
            path.display(),
            temp_path.display(),
            e
        ))
    })?;

    sync_parent_dir(path).await
}

// The rename is only durable once the directory entry itself is flushed
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let failed = |e: std::io::Error| {
        StorageError::FileSystemError(format!(
            "Failed to sync directory {}: {}",
            parent.display(),
            e
        ))
    };

    let dir = tokio::fs::File::open(parent).await.map_err(failed)?;
    dir.sync_all().await.map_err(failed)
}

// Directories cannot be opened for syncing here; the rename is best effort
#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", file_name))
}
