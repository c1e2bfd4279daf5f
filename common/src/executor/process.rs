// Process-backed job runner
// Jobs run synchronously with no timeout; a job may itself poll remote work for hours

use crate::errors::ExecutionError;
use crate::executor::{JobInvocation, JobRunner};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, instrument};

/// ProcessJobRunner spawns the job executable and captures its output verbatim
#[derive(Debug, Clone, Default)]
pub struct ProcessJobRunner;

impl ProcessJobRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    #[instrument(skip(self, invocation), fields(job_id = %invocation.job_id))]
    async fn run(&self, invocation: &JobInvocation) -> Result<(), ExecutionError> {
        let executable = &invocation.executable;
        match tokio::fs::metadata(executable).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(ExecutionError::ExecutableNotFound(
                    executable.display().to_string(),
                ))
            }
        }

        let log_path = &invocation.workspace.log_file;
        let capture_failed = |e: std::io::Error| ExecutionError::LogCaptureFailed {
            path: log_path.display().to_string(),
            reason: e.to_string(),
        };
        let stdout_log = tokio::fs::File::create(log_path)
            .await
            .map_err(capture_failed)?
            .into_std()
            .await;
        let stderr_log = stdout_log.try_clone().map_err(capture_failed)?;

        let command_line = invocation.command_line();
        info!(
            command = %command_line,
            log_file = %log_path.display(),
            "Running job"
        );

        let status = Command::new(executable)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .status()
            .await
            .map_err(|e| ExecutionError::SpawnFailed {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        if status.success() {
            info!(log_file = %log_path.display(), "Job finished successfully");
            Ok(())
        } else {
            error!(
                exit_code = ?status.code(),
                log_file = %log_path.display(),
                "Job failed"
            );
            Err(ExecutionError::NonZeroExit {
                code: status.code(),
                log_path: log_path.display().to_string(),
            })
        }
    }
}
