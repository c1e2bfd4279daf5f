// Scheduler module: sequencing of due jobs through the ingestion pipeline

pub mod engine;

pub use engine::{plan, Orchestrator, OrchestratorConfig, PlannedJob, RunSummary};
