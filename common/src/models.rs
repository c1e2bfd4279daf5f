use crate::errors::ErrorKind;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

// Accepts a plain date or a full ISO 8601 timestamp and keeps the date part
fn deserialize_run_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => {
            let date_part = s.get(..10).unwrap_or(&s);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid date '{}': {}", s, e)))
        }
    }
}

fn default_disabled() -> bool {
    true
}

// ============================================================================
// Schedule Models
// ============================================================================

/// The schedule file: global settings plus job entries in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub jobs: IndexMap<String, JobEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Commit each target after a successful insert/update
    #[serde(default)]
    pub commit_index: bool,
}

/// JobEntry describes one ingestion job and its scheduling state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    #[serde(default)]
    pub executable_path: PathBuf,
    #[serde(default, deserialize_with = "deserialize_run_date")]
    pub last_run: Option<NaiveDate>,
    pub interval_days: u32,
    #[serde(default)]
    pub force_run: bool,
    /// Entries that omit this field never run
    #[serde(default = "default_disabled")]
    pub disabled: bool,
    #[serde(default)]
    pub insert_targets: Vec<InsertTarget>,
    #[serde(default)]
    pub update_targets: Vec<UpdateTarget>,
}

impl JobEntry {
    pub fn new(executable_path: impl Into<PathBuf>, interval_days: u32) -> Self {
        Self {
            executable_path: executable_path.into(),
            last_run: None,
            interval_days,
            force_run: false,
            disabled: false,
            insert_targets: Vec::new(),
            update_targets: Vec::new(),
        }
    }

    pub fn has_insert_targets(&self) -> bool {
        !self.insert_targets.is_empty()
    }

    pub fn has_update_targets(&self) -> bool {
        !self.update_targets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertTarget {
    pub index_name: String,
    #[serde(rename = "key")]
    pub key_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTarget {
    pub index_name: String,
    #[serde(rename = "key")]
    pub key_field: String,
    /// The only fields this job may ever mutate on the index
    #[serde(rename = "fields", default)]
    pub allowed_fields: BTreeSet<String>,
}

// ============================================================================
// Planning Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    Run(RunReason),
    Skip(SkipReason),
}

impl RunDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, RunDecision::Run(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReason {
    Forced,
    NeverRun,
    Due { next_run: NaiveDate },
}

impl fmt::Display for RunReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunReason::Forced => write!(f, "forced"),
            RunReason::NeverRun => write!(f, "never run"),
            RunReason::Due { next_run } => write!(f, "due since {}", next_run),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotDue { next_run: NaiveDate },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "disabled"),
            SkipReason::NotDue { next_run } => write!(f, "not due until {}", next_run),
        }
    }
}

// ============================================================================
// Run History Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOperation {
    Insert,
    Update,
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOperation::Insert => write!(f, "insert"),
            IndexOperation::Update => write!(f, "update"),
        }
    }
}

/// Result of applying one batch to one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub index_name: String,
    pub operation: IndexOperation,
    pub documents: usize,
    pub committed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// One immutable ledger entry per job attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_id: String,
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub targets: Vec<TargetOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_files: Vec<PathBuf>,
}

impl RunRecord {
    /// Documents successfully inserted across all targets
    pub fn inserted(&self) -> usize {
        self.count(IndexOperation::Insert)
    }

    /// Documents successfully updated across all targets
    pub fn updated(&self) -> usize {
        self.count(IndexOperation::Update)
    }

    fn count(&self, operation: IndexOperation) -> usize {
        self.targets
            .iter()
            .filter(|t| t.operation == operation && t.is_success())
            .map(|t| t.documents)
            .sum()
    }
}

// ============================================================================
// Backup Models
// ============================================================================

/// Pre-mutation values of exactly the fields an update is about to set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub index_name: String,
    pub document_id: String,
    pub run_date: NaiveDate,
    pub fields: Map<String, Value>,
}
