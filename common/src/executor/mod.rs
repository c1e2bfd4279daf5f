// Executor module for job execution
// A job is any executable honoring the --date/--work_dir/--insert_file/--update_file contract

pub mod process;

pub use process::ProcessJobRunner;

use crate::errors::ExecutionError;
use crate::models::JobEntry;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// JobRunner executes one job invocation to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run the job and wait for it to exit. Ok means exit status 0.
    async fn run(&self, invocation: &JobInvocation) -> Result<(), ExecutionError>;
}

/// Per-run file layout, derived only from (job_id, run_date)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub work_dir: PathBuf,
    pub insert_file: Option<PathBuf>,
    pub update_file: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl JobWorkspace {
    /// Layout: `<output_root>/<run_date>/<job_id>/`
    pub fn for_job(output_root: &Path, job_id: &str, run_date: NaiveDate, entry: &JobEntry) -> Self {
        let work_dir = output_root
            .join(run_date.format("%Y-%m-%d").to_string())
            .join(job_id);

        let insert_file = entry
            .has_insert_targets()
            .then(|| work_dir.join(format!("{}_insert.json", job_id)));
        let update_file = entry
            .has_update_targets()
            .then(|| work_dir.join(format!("{}_update.json", job_id)));
        let log_file = work_dir.join(format!("{}.log", job_id));

        Self {
            work_dir,
            insert_file,
            update_file,
            log_file,
        }
    }

    /// Create the work directory, clearing leftovers from an earlier run on the same day
    pub async fn prepare(&self) -> Result<(), ExecutionError> {
        let failed = |e: std::io::Error| ExecutionError::WorkDirFailed {
            path: self.work_dir.display().to_string(),
            reason: e.to_string(),
        };

        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => debug!(work_dir = %self.work_dir.display(), "Cleared previous work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(failed(e)),
        }

        tokio::fs::create_dir_all(&self.work_dir).await.map_err(failed)
    }

    /// Remove output files a failed job may have left half-written
    pub async fn discard_outputs(&self) {
        for file in [&self.insert_file, &self.update_file].into_iter().flatten() {
            match tokio::fs::remove_file(file).await {
                Ok(()) => debug!(file = %file.display(), "Removed incomplete output file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %file.display(), error = %e, "Could not remove output file"),
            }
        }
    }
}

/// Everything needed to launch one job process
#[derive(Debug, Clone)]
pub struct JobInvocation {
    pub job_id: String,
    pub executable: PathBuf,
    /// Start of the data window passed as --date
    pub data_date: NaiveDate,
    pub workspace: JobWorkspace,
}

impl JobInvocation {
    /// The job's data window starts at its last successful run, or at the
    /// run date for a job that has never run.
    pub fn new(job_id: &str, entry: &JobEntry, run_date: NaiveDate, workspace: JobWorkspace) -> Self {
        Self {
            job_id: job_id.to_string(),
            executable: entry.executable_path.clone(),
            data_date: entry.last_run.unwrap_or(run_date),
            workspace,
        }
    }

    /// Command-line arguments in contract order
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--date".into(),
            self.data_date.format("%Y-%m-%d").to_string().into(),
            "--work_dir".into(),
            self.workspace.work_dir.clone().into_os_string(),
        ];
        if let Some(insert_file) = &self.workspace.insert_file {
            args.push("--insert_file".into());
            args.push(insert_file.clone().into_os_string());
        }
        if let Some(update_file) = &self.workspace.update_file {
            args.push("--update_file".into());
            args.push(update_file.clone().into_os_string());
        }
        args
    }

    /// Printable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_os_str().to_os_string())
            .chain(self.args())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
