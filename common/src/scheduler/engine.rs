// Orchestrator: one sequential pass over the schedule
//
// Per job, in declared order: plan, execute, validate, back up, apply, commit,
// record. A failing stage ends that job only; the pass always moves on.

use crate::backup::BackupManager;
use crate::config::PathsConfig;
use crate::errors::PipelineError;
use crate::executor::{JobInvocation, JobRunner, JobWorkspace};
use crate::index::IndexGateway;
use crate::models::{
    IndexOperation, InsertTarget, JobEntry, RunDecision, RunReason, RunRecord, RunStatus,
    ScheduleConfig, TargetOutcome, UpdateTarget,
};
use crate::schedule::RunPlanner;
use crate::storage::{HistoryLedger, ScheduleStore};
use crate::telemetry::log_run_record;
use crate::validation::{DocumentBatch, OutputValidator};
use chrono::{NaiveDate, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Filesystem locations the orchestrator works with
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub schedule_file: PathBuf,
    pub output_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub history_file: PathBuf,
}

impl From<&PathsConfig> for OrchestratorConfig {
    fn from(paths: &PathsConfig) -> Self {
        Self {
            schedule_file: paths.schedule_file.clone(),
            output_dir: paths.output_dir(),
            backup_dir: paths.backup_dir.clone(),
            history_file: paths.history_file(),
        }
    }
}

/// Counts of job outcomes for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Succeeded => self.succeeded += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Skipped => self.skipped += 1,
        }
    }

    /// 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}

/// A planning decision for one job, as reported by a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub job_id: String,
    pub decision: RunDecision,
}

/// Decide every job in declared order without side effects
pub fn plan(config: &ScheduleConfig, today: NaiveDate) -> Vec<PlannedJob> {
    config
        .jobs
        .iter()
        .map(|(job_id, entry)| PlannedJob {
            job_id: job_id.clone(),
            decision: entry.decide(today),
        })
        .collect()
}

#[derive(Debug, Default)]
struct ValidatedOutputs {
    inserts: Vec<(InsertTarget, DocumentBatch)>,
    updates: Vec<(UpdateTarget, DocumentBatch)>,
}

/// Main orchestrator implementation
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn JobRunner>,
    gateway: Arc<dyn IndexGateway>,
    backups: BackupManager,
    validator: OutputValidator,
    store: ScheduleStore,
    ledger: HistoryLedger,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        runner: Arc<dyn JobRunner>,
        gateway: Arc<dyn IndexGateway>,
    ) -> Self {
        Self {
            backups: BackupManager::new(config.backup_dir.clone(), gateway.clone()),
            validator: OutputValidator::new(),
            store: ScheduleStore::new(config.schedule_file.clone()),
            ledger: HistoryLedger::new(config.history_file.clone()),
            config,
            runner,
            gateway,
        }
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Run every job in `config` that is due on `today`.
    ///
    /// `config` is the authoritative scheduling state: a job's `last_run`
    /// advances only after it succeeds, and the schedule file is saved right
    /// away so a later crash cannot lose the advance.
    #[instrument(skip(self, config), fields(jobs = config.jobs.len()))]
    pub async fn run_pass(&self, config: &mut ScheduleConfig, today: NaiveDate) -> RunSummary {
        let mut summary = RunSummary::default();
        let commit = config.settings.commit_index;
        let job_ids: Vec<String> = config.jobs.keys().cloned().collect();

        info!(run_date = %today, commit_index = commit, "Starting scheduling pass");

        for job_id in job_ids {
            let Some(entry) = config.jobs.get(&job_id).cloned() else {
                continue;
            };

            let record = match entry.decide(today) {
                RunDecision::Skip(reason) => {
                    debug!(job_id = %job_id, reason = %reason, "Skipping job");
                    skipped_record(&job_id, today, reason.to_string())
                }
                RunDecision::Run(reason) => {
                    self.run_job(&job_id, &entry, reason, today, commit).await
                }
            };

            log_run_record(&record);
            summary.record(record.status);

            if let Err(e) = self.ledger.append(&record).await {
                error!(job_id = %job_id, error = %e, "Failed to append run record");
            }

            if record.status == RunStatus::Succeeded {
                if let Some(entry) = config.jobs.get_mut(&job_id) {
                    entry.last_run = Some(today);
                }
                if let Err(e) = self.store.save(config).await {
                    error!(
                        job_id = %job_id,
                        error = %e,
                        "Failed to save schedule; the job will run again next time"
                    );
                }
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Scheduling pass finished"
        );
        summary
    }

    /// Run all stages for one due job and describe the outcome
    #[instrument(skip(self, entry, reason), fields(reason = %reason))]
    async fn run_job(
        &self,
        job_id: &str,
        entry: &JobEntry,
        reason: RunReason,
        run_date: NaiveDate,
        commit: bool,
    ) -> RunRecord {
        let mut record = RunRecord {
            run_id: Uuid::new_v4(),
            job_id: job_id.to_string(),
            run_date,
            status: RunStatus::Succeeded,
            reason: reason.to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            targets: Vec::new(),
            error_kind: None,
            error_message: None,
            insert_file: None,
            update_file: None,
            log_file: None,
            backup_files: Vec::new(),
        };

        let workspace = JobWorkspace::for_job(&self.config.output_dir, job_id, run_date, entry);
        let invocation = JobInvocation::new(job_id, entry, run_date, workspace.clone());

        if let Err(e) = self.execute(&invocation).await {
            if workspace.log_file.exists() {
                record.log_file = Some(workspace.log_file.clone());
            }
            return finish_failed(record, e.into());
        }
        record.log_file = Some(workspace.log_file.clone());

        let outputs = match self.validate_outputs(entry, &workspace, &mut record).await {
            Ok(outputs) => outputs,
            Err(e) => return finish_failed(record, e),
        };

        for (target, batch) in &outputs.inserts {
            let outcome = self.apply_insert(target, batch, commit).await;
            record.targets.push(outcome);
        }

        for (target, batch) in &outputs.updates {
            let outcome = self
                .apply_update(&mut record, target, batch, commit)
                .await;
            record.targets.push(outcome);
        }

        if let Some(failed) = record.targets.iter().find(|t| !t.is_success()) {
            record.status = RunStatus::Failed;
            record.error_kind = failed.error_kind;
            record.error_message = failed.error_message.clone();
        }
        record.finished_at = Utc::now();
        record
    }

    async fn execute(&self, invocation: &JobInvocation) -> Result<(), PipelineError> {
        invocation.workspace.prepare().await?;

        if let Err(e) = self.runner.run(invocation).await {
            invocation.workspace.discard_outputs().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate every produced file against every target before anything is applied
    async fn validate_outputs(
        &self,
        entry: &JobEntry,
        workspace: &JobWorkspace,
        record: &mut RunRecord,
    ) -> Result<ValidatedOutputs, PipelineError> {
        let mut outputs = ValidatedOutputs::default();

        if let Some(path) = existing_output(workspace.insert_file.as_deref()).await {
            record.insert_file = Some(path.clone());
            for target in &entry.insert_targets {
                let batch = self.validator.validate_insert_file(&path, target).await?;
                outputs.inserts.push((target.clone(), batch));
            }
        }

        if let Some(path) = existing_output(workspace.update_file.as_deref()).await {
            record.update_file = Some(path.clone());
            for target in &entry.update_targets {
                let batch = self.validator.validate_update_file(&path, target).await?;
                outputs.updates.push((target.clone(), batch));
            }
        }

        Ok(outputs)
    }

    async fn apply_insert(
        &self,
        target: &InsertTarget,
        batch: &DocumentBatch,
        commit: bool,
    ) -> TargetOutcome {
        let mut outcome = empty_outcome(&target.index_name, IndexOperation::Insert);
        if batch.is_empty() {
            info!(index_name = %target.index_name, "No documents to insert");
            return outcome;
        }

        match self.gateway.insert(&target.index_name, batch).await {
            Ok(count) => outcome.documents = count,
            Err(e) => return failed_outcome(outcome, e.into()),
        }
        self.commit_target(outcome, commit).await
    }

    async fn apply_update(
        &self,
        record: &mut RunRecord,
        target: &UpdateTarget,
        batch: &DocumentBatch,
        commit: bool,
    ) -> TargetOutcome {
        let mut outcome = empty_outcome(&target.index_name, IndexOperation::Update);
        if batch.is_empty() {
            info!(index_name = %target.index_name, "No documents to update");
            return outcome;
        }

        match self
            .backups
            .capture(&record.job_id, record.run_id, record.run_date, target, batch)
            .await
        {
            Ok(Some(path)) => record.backup_files.push(path),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    index_name = %target.index_name,
                    error = %e,
                    "Backup failed, skipping update for this target"
                );
                return failed_outcome(outcome, e.into());
            }
        }

        match self.gateway.update(&target.index_name, batch).await {
            Ok(count) => outcome.documents = count,
            Err(e) => return failed_outcome(outcome, e.into()),
        }
        self.commit_target(outcome, commit).await
    }

    async fn commit_target(&self, mut outcome: TargetOutcome, commit: bool) -> TargetOutcome {
        if !commit {
            return outcome;
        }
        match self.gateway.commit(&outcome.index_name).await {
            Ok(()) => {
                outcome.committed = true;
                outcome
            }
            Err(e) => failed_outcome(outcome, e.into()),
        }
    }
}

// A declared output the job did not write means "nothing of that kind"
async fn existing_output(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    match tokio::fs::try_exists(path).await {
        Ok(true) => Some(path.to_path_buf()),
        Ok(false) => {
            info!(file = %path.display(), "Job produced no output file");
            None
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Could not check output file");
            None
        }
    }
}

fn skipped_record(job_id: &str, run_date: NaiveDate, reason: String) -> RunRecord {
    let now = Utc::now();
    RunRecord {
        run_id: Uuid::new_v4(),
        job_id: job_id.to_string(),
        run_date,
        status: RunStatus::Skipped,
        reason,
        started_at: now,
        finished_at: now,
        targets: Vec::new(),
        error_kind: None,
        error_message: None,
        insert_file: None,
        update_file: None,
        log_file: None,
        backup_files: Vec::new(),
    }
}

fn finish_failed(mut record: RunRecord, error: PipelineError) -> RunRecord {
    record.status = RunStatus::Failed;
    record.error_kind = Some(error.kind());
    record.error_message = Some(error.to_string());
    record.finished_at = Utc::now();
    record
}

fn empty_outcome(index_name: &str, operation: IndexOperation) -> TargetOutcome {
    TargetOutcome {
        index_name: index_name.to_string(),
        operation,
        documents: 0,
        committed: false,
        error_kind: None,
        error_message: None,
    }
}

fn failed_outcome(mut outcome: TargetOutcome, error: PipelineError) -> TargetOutcome {
    error!(
        index_name = %outcome.index_name,
        operation = %outcome.operation,
        error = %error,
        "Target failed"
    );
    outcome.error_kind = Some(error.kind());
    outcome.error_message = Some(error.to_string());
    outcome
}
