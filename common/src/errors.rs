// Error handling framework
// One enum per pipeline stage, plus the serializable kind written to the run ledger

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schedule configuration errors. Fatal: the pass aborts before any job runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read schedule file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Malformed schedule file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Job '{0}' has no executable_path")]
    MissingExecutable(String),

    #[error("Invalid job '{job_id}': {reason}")]
    InvalidJob { job_id: String, reason: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Job process execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to prepare work directory {path}: {reason}")]
    WorkDirFailed { path: String, reason: String },

    #[error("Failed to open log file {path}: {reason}")]
    LogCaptureFailed { path: String, reason: String },

    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Job exited with {} (see log: {log_path})", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, log_path: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Output file validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid JSON in {path}: {reason}")]
    InvalidJson { path: String, reason: String },

    #[error("{path} must contain a JSON array of documents")]
    NotAnArray { path: String },

    #[error("{path}: document {index} is not a JSON object")]
    NotAnObject { path: String, index: usize },

    #[error("{path}: document {index} is missing key field '{key}'")]
    MissingKey {
        path: String,
        index: usize,
        key: String,
    },

    #[error("{path}: document {index} has invalid key field '{key}': {reason}")]
    InvalidKey {
        path: String,
        index: usize,
        key: String,
        reason: String,
    },

    #[error("{path}: document {index} updates field '{field}' which is not allowed (allowed: {allowed:?})")]
    FieldNotAllowed {
        path: String,
        index: usize,
        field: String,
        allowed: Vec<String>,
    },

    #[error("{path}: document {index} has invalid update for field '{field}': {reason}")]
    InvalidOperation {
        path: String,
        index: usize,
        field: String,
        reason: String,
    },
}

/// Pre-image capture errors
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to fetch current documents from {index_name}: {reason}")]
    FetchFailed { index_name: String, reason: String },

    #[error("Document '{document_id}' not found in {index_name}")]
    DocumentNotFound {
        index_name: String,
        document_id: String,
    },

    #[error("Failed to persist backup {path}: {reason}")]
    PersistFailed { path: String, reason: String },
}

/// Index operation errors, attributed to a single target
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to create index client: {0}")]
    ClientInit(String),

    #[error("Index tool '{tool}' could not be started: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("{operation} on {index_name} failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        index_name: String,
        operation: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Read request to {index_name} failed: {reason}")]
    RequestFailed { index_name: String, reason: String },

    #[error("Invalid response from {index_name}: {reason}")]
    InvalidResponse { index_name: String, reason: String },
}

/// Storage errors for the schedule file, ledger and backups
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Error classification recorded in the run ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    ExecutionError,
    ValidationError,
    BackupError,
    IndexOperationError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::BackupError => "BackupError",
            ErrorKind::IndexOperationError => "IndexOperationError",
        };
        f.write_str(name)
    }
}

/// Any error a single job can fail with
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Execution(_) => ErrorKind::ExecutionError,
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Backup(_) => ErrorKind::BackupError,
            PipelineError::Index(_) => ErrorKind::IndexOperationError,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}
