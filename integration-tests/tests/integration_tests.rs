// Integration tests for the ingestion scheduler
// Real shell-script jobs run through the full pipeline against a recording index gateway

#![cfg(unix)]

use async_trait::async_trait;
use chrono::NaiveDate;
use common::errors::{ConfigError, ErrorKind, IndexError};
use common::executor::ProcessJobRunner;
use common::index::IndexGateway;
use common::models::{BackupSnapshot, RunStatus, ScheduleConfig};
use common::scheduler::{Orchestrator, OrchestratorConfig, RunSummary};
use common::storage::ScheduleStore;
use common::validation::DocumentBatch;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// In-memory index that records every call made through the gateway
#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<String>>,
    documents: Mutex<HashMap<(String, String), Map<String, Value>>>,
}

impl RecordingGateway {
    fn with_document(self, index_name: &str, id: &str, doc: Value) -> Self {
        let doc = doc.as_object().cloned().unwrap_or_default();
        self.documents
            .lock()
            .unwrap()
            .insert((index_name.to_string(), id.to_string()), doc);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn document(&self, index_name: &str, id: &str) -> Option<Map<String, Value>> {
        self.documents
            .lock()
            .unwrap()
            .get(&(index_name.to_string(), id.to_string()))
            .cloned()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn id_of(doc: &Map<String, Value>, key_field: &str) -> String {
    match doc.get(key_field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl IndexGateway for RecordingGateway {
    async fn fetch(
        &self,
        index_name: &str,
        key_field: &str,
        ids: &[String],
        fields: &[String],
    ) -> Result<Vec<Map<String, Value>>, IndexError> {
        self.record(format!("fetch {} {}", index_name, ids.join(",")));
        let documents = self.documents.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(&(index_name.to_string(), id.clone())))
            .map(|doc| {
                let mut projected = Map::new();
                projected.insert(key_field.to_string(), doc[key_field].clone());
                for field in fields {
                    if let Some(value) = doc.get(field) {
                        projected.insert(field.clone(), value.clone());
                    }
                }
                projected
            })
            .collect())
    }

    async fn insert(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError> {
        self.record(format!("insert {} {}", index_name, batch.len()));
        let mut documents = self.documents.lock().unwrap();
        for doc in &batch.documents {
            let id = id_of(doc, &batch.key_field);
            documents.insert((index_name.to_string(), id), doc.clone());
        }
        Ok(batch.len())
    }

    async fn update(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError> {
        self.record(format!("update {} {}", index_name, batch.len()));
        let mut documents = self.documents.lock().unwrap();
        for update in &batch.documents {
            let id = id_of(update, &batch.key_field);
            let doc = documents.entry((index_name.to_string(), id)).or_default();
            for (field, operation) in update {
                if *field != batch.key_field {
                    doc.insert(field.clone(), operation["set"].clone());
                }
            }
        }
        Ok(batch.len())
    }

    async fn commit(&self, index_name: &str) -> Result<(), IndexError> {
        self.record(format!("commit {}", index_name));
        Ok(())
    }
}

/// Test environment rooted in a temp directory
struct Harness {
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn paths(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            schedule_file: self.root().join("config/ingestion_schedule.json"),
            output_dir: self.root().join("data/output"),
            backup_dir: self.root().join("backup"),
            history_file: self.root().join("data/run_history.json"),
        }
    }

    fn calls_file(&self, job: &str) -> PathBuf {
        self.root().join(format!("{}.calls", job))
    }

    /// Write a job script that records its arguments, then runs `body`.
    /// `body` sees the output paths as $insert and $update.
    fn write_job(&self, name: &str, body: &str) -> PathBuf {
        let script = format!(
            "#!/bin/sh\n\
             echo \"$@\" >> '{calls}'\n\
             while [ $# -gt 0 ]; do\n\
               case \"$1\" in\n\
                 --insert_file) insert=\"$2\"; shift 2 ;;\n\
                 --update_file) update=\"$2\"; shift 2 ;;\n\
                 *) shift ;;\n\
               esac\n\
             done\n\
             {body}\n",
            calls = self.calls_file(name).display(),
            body = body,
        );
        let path = self.root().join("jobs").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invocations(&self, job: &str) -> Vec<String> {
        std::fs::read_to_string(self.calls_file(job))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    async fn write_schedule(&self, schedule: Value) -> ScheduleConfig {
        let store = ScheduleStore::new(self.paths().schedule_file);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), serde_json::to_string_pretty(&schedule).unwrap()).unwrap();
        store.load().await.unwrap()
    }

    async fn run(
        &self,
        gateway: Arc<RecordingGateway>,
        config: &mut ScheduleConfig,
        today: NaiveDate,
    ) -> (Orchestrator, RunSummary) {
        let orchestrator = Orchestrator::new(
            self.paths(),
            Arc::new(ProcessJobRunner::new()),
            gateway,
        );
        let summary = orchestrator.run_pass(config, today).await;
        (orchestrator, summary)
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

const TWO_GENOMES: &str = "cat > \"$insert\" <<'EOF'\n\
[{\"genome_id\": \"11.1\", \"genome_name\": \"A\"}, {\"genome_id\": \"11.2\", \"genome_name\": \"B\"}]\n\
EOF";

#[tokio::test]
async fn test_due_insert_job_end_to_end() {
    let harness = Harness::new();
    let job = harness.write_job("genomes", TWO_GENOMES);
    let mut config = harness
        .write_schedule(json!({
            "settings": {"commit_index": true},
            "jobs": {
                "genomes": {
                    "executable_path": job,
                    "last_run": "2024-06-01",
                    "interval_days": 2,
                    "disabled": false,
                    "insert_targets": [{"index_name": "genome", "key": "genome_id"}]
                }
            }
        }))
        .await;
    let gateway = Arc::new(RecordingGateway::default());

    let (orchestrator, summary) = harness.run(gateway.clone(), &mut config, today()).await;

    assert_eq!(summary, RunSummary { succeeded: 1, failed: 0, skipped: 0 });
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(gateway.calls(), vec!["insert genome 2", "commit genome"]);
    assert!(gateway.document("genome", "11.2").is_some());

    // The job saw its data window start and the derived output path
    let invocations = harness.invocations("genomes");
    assert_eq!(invocations.len(), 1);
    let work_dir = harness.root().join("data/output/2024-06-03/genomes");
    assert_eq!(
        invocations[0],
        format!(
            "--date 2024-06-01 --work_dir {} --insert_file {}",
            work_dir.display(),
            work_dir.join("genomes_insert.json").display()
        )
    );

    let record = orchestrator
        .ledger()
        .last_success("genomes")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.inserted(), 2);
    assert_eq!(record.run_date, today());

    // last_run advanced in memory and on disk
    assert_eq!(config.jobs["genomes"].last_run, Some(today()));
    let saved = orchestrator.store().load().await.unwrap();
    assert_eq!(saved.jobs["genomes"].last_run, Some(today()));
    assert!(saved.settings.commit_index);
}

#[tokio::test]
async fn test_same_day_rerun_is_skipped() {
    let harness = Harness::new();
    let job = harness.write_job("genomes", TWO_GENOMES);
    let mut config = harness
        .write_schedule(json!({
            "jobs": {
                "genomes": {
                    "executable_path": job,
                    "interval_days": 1,
                    "disabled": false,
                    "insert_targets": [{"index_name": "genome", "key": "genome_id"}]
                }
            }
        }))
        .await;
    let gateway = Arc::new(RecordingGateway::default());

    let (_, first) = harness.run(gateway.clone(), &mut config, today()).await;
    let mut reloaded = ScheduleStore::new(harness.paths().schedule_file)
        .load()
        .await
        .unwrap();
    let (orchestrator, second) = harness.run(gateway.clone(), &mut reloaded, today()).await;

    assert_eq!(first.succeeded, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(harness.invocations("genomes").len(), 1);
    // A never-run job starts its data window at the run date
    assert!(harness.invocations("genomes")[0].starts_with("--date 2024-06-03 "));
    // No commit without commit_index
    assert_eq!(gateway.calls(), vec!["insert genome 2"]);

    let records = orchestrator.ledger().records_for("genomes").await.unwrap();
    let statuses: Vec<RunStatus> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![RunStatus::Succeeded, RunStatus::Skipped]);
}

#[tokio::test]
async fn test_disallowed_update_field_fails_validation() {
    let harness = Harness::new();
    let job = harness.write_job(
        "clades",
        "cat > \"$update\" <<'EOF'\n\
         [{\"genome_id\": \"11.1\", \"genome_name\": {\"set\": \"renamed\"}}]\n\
         EOF",
    );
    let mut config = harness
        .write_schedule(json!({
            "settings": {"commit_index": true},
            "jobs": {
                "clades": {
                    "executable_path": job,
                    "interval_days": 7,
                    "disabled": false,
                    "update_targets": [{"index_name": "genome", "key": "genome_id", "fields": ["subclade"]}]
                }
            }
        }))
        .await;
    let gateway = Arc::new(
        RecordingGateway::default().with_document("genome", "11.1", json!({"genome_id": "11.1", "genome_name": "A"})),
    );

    let (orchestrator, summary) = harness.run(gateway.clone(), &mut config, today()).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), 1);
    assert!(gateway.calls().is_empty());
    assert!(!harness.root().join("backup").exists());
    assert_eq!(config.jobs["clades"].last_run, None);

    let records = orchestrator.ledger().records().await.unwrap();
    assert_eq!(records[0].status, RunStatus::Failed);
    assert_eq!(records[0].error_kind, Some(ErrorKind::ValidationError));
    assert!(records[0]
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("genome_name"));
}

#[tokio::test]
async fn test_update_is_backed_up_then_applied() {
    let harness = Harness::new();
    let job = harness.write_job(
        "clades",
        "cat > \"$update\" <<'EOF'\n\
         [{\"genome_id\": \"11.1\", \"subclade\": {\"set\": \"2.3.4.4b\"}}, {\"genome_id\": \"11.2\", \"subclade\": {\"set\": \"2.3.4.4c\"}}]\n\
         EOF",
    );
    let mut config = harness
        .write_schedule(json!({
            "settings": {"commit_index": true},
            "jobs": {
                "clades": {
                    "executable_path": job,
                    "interval_days": 7,
                    "disabled": false,
                    "update_targets": [{"index_name": "genome", "key": "genome_id", "fields": ["subclade"]}]
                }
            }
        }))
        .await;
    let gateway = Arc::new(
        RecordingGateway::default()
            .with_document("genome", "11.1", json!({"genome_id": "11.1", "subclade": "2.3.4.4"}))
            .with_document("genome", "11.2", json!({"genome_id": "11.2"})),
    );

    let (orchestrator, summary) = harness.run(gateway.clone(), &mut config, today()).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        gateway.calls(),
        vec!["fetch genome 11.1,11.2", "update genome 2", "commit genome"]
    );
    assert_eq!(gateway.document("genome", "11.1").unwrap()["subclade"], "2.3.4.4b");

    let record = orchestrator
        .ledger()
        .last_success("clades")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.updated(), 2);
    assert_eq!(record.backup_files.len(), 1);
    assert!(record.backup_files[0].starts_with(harness.root().join("backup/2024-06-03/clades")));

    let snapshots: Vec<BackupSnapshot> =
        serde_json::from_slice(&std::fs::read(&record.backup_files[0]).unwrap()).unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].fields["subclade"], "2.3.4.4");
    assert_eq!(snapshots[1].fields["subclade"], Value::Null);
}

#[tokio::test]
async fn test_failed_job_is_isolated() {
    let harness = Harness::new();
    let broken = harness.write_job(
        "broken",
        "echo 'partial' > \"$insert\"\necho 'upstream unavailable' >&2\nexit 3",
    );
    let healthy = harness.write_job("genomes", TWO_GENOMES);
    let mut config = harness
        .write_schedule(json!({
            "jobs": {
                "broken": {
                    "executable_path": broken,
                    "last_run": "2024-05-01",
                    "interval_days": 1,
                    "disabled": false,
                    "insert_targets": [{"index_name": "genome", "key": "genome_id"}]
                },
                "genomes": {
                    "executable_path": healthy,
                    "interval_days": 1,
                    "disabled": false,
                    "insert_targets": [{"index_name": "genome", "key": "genome_id"}]
                },
                "dormant": {
                    "executable_path": "/does/not/matter",
                    "interval_days": 1
                }
            }
        }))
        .await;
    let gateway = Arc::new(RecordingGateway::default());

    let (orchestrator, summary) = harness.run(gateway.clone(), &mut config, today()).await;

    assert_eq!(summary, RunSummary { succeeded: 1, failed: 1, skipped: 1 });
    assert_eq!(gateway.calls(), vec!["insert genome 2"]);
    assert_eq!(config.jobs["broken"].last_run, NaiveDate::from_ymd_opt(2024, 5, 1));

    let records = orchestrator.ledger().records_for("broken").await.unwrap();
    assert_eq!(records[0].error_kind, Some(ErrorKind::ExecutionError));
    let log_file = records[0].log_file.clone().unwrap();
    assert!(std::fs::read_to_string(log_file)
        .unwrap()
        .contains("upstream unavailable"));
    assert!(!harness
        .root()
        .join("data/output/2024-06-03/broken/broken_insert.json")
        .exists());

    // Entries without an explicit disabled flag never run
    let dormant = orchestrator.ledger().records_for("dormant").await.unwrap();
    assert_eq!(dormant[0].status, RunStatus::Skipped);
    assert_eq!(dormant[0].reason, "disabled");
}

#[tokio::test]
async fn test_missing_executable_is_execution_error() {
    let harness = Harness::new();
    let mut config = harness
        .write_schedule(json!({
            "jobs": {
                "ghost": {
                    "executable_path": harness.root().join("jobs/ghost"),
                    "interval_days": 1,
                    "force_run": true,
                    "disabled": false
                }
            }
        }))
        .await;
    let gateway = Arc::new(RecordingGateway::default());

    let (orchestrator, summary) = harness.run(gateway, &mut config, today()).await;

    assert_eq!(summary.failed, 1);
    let records = orchestrator.ledger().records().await.unwrap();
    assert_eq!(records[0].reason, "forced");
    assert_eq!(records[0].error_kind, Some(ErrorKind::ExecutionError));
}

#[tokio::test]
async fn test_job_id_that_escapes_its_directory_is_rejected() {
    let harness = Harness::new();
    let genomes = harness.write_job("genomes", TWO_GENOMES);
    let wiper = harness.write_job("wiper", "exit 0");

    // Raw JSON keeps the declared order: a real job first, then the bad id
    let store = ScheduleStore::new(harness.paths().schedule_file);
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(
        store.path(),
        format!(
            r#"{{"jobs": {{
                "genomes": {{"executable_path": "{}", "interval_days": 1, "disabled": false}},
                "": {{"executable_path": "{}", "interval_days": 1, "disabled": false}}
            }}}}"#,
            genomes.display(),
            wiper.display()
        ),
    )
    .unwrap();

    let err = store.load().await.unwrap_err();

    assert!(matches!(err, ConfigError::InvalidJob { ref job_id, .. } if job_id.is_empty()));
    assert!(harness.invocations("genomes").is_empty());
    assert!(!harness.root().join("data").exists());
}
