// Telemetry module for structured logging

use crate::models::{RunRecord, RunStatus};
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over `log_level`. JSON output is the default
/// for unattended runs; plain output is meant for operators at a terminal.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer().with_target(false).with_filter(env_filter).boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(log_level = log_level, json = json, "Logging initialized");
    Ok(())
}

/// Emit one structured event summarising a ledger record
pub fn log_run_record(record: &RunRecord) {
    match record.status {
        RunStatus::Succeeded => tracing::info!(
            job_id = %record.job_id,
            run_id = %record.run_id,
            run_date = %record.run_date,
            inserted = record.inserted(),
            updated = record.updated(),
            "Job succeeded"
        ),
        RunStatus::Skipped => tracing::info!(
            job_id = %record.job_id,
            reason = %record.reason,
            "Job skipped"
        ),
        RunStatus::Failed => tracing::error!(
            job_id = %record.job_id,
            run_id = %record.run_id,
            run_date = %record.run_date,
            error_kind = ?record.error_kind,
            error = record.error_message.as_deref().unwrap_or(""),
            log_file = ?record.log_file,
            "Job failed"
        ),
    }
}
