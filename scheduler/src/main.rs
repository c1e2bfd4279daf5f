// Scheduler binary entry point
// One invocation is one pass over the schedule; run it from cron or a systemd timer.

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::Parser;
use common::config::Settings;
use common::errors::ConfigError;
use common::executor::ProcessJobRunner;
use common::index::ExternalIndexGateway;
use common::models::RunDecision;
use common::scheduler::{plan, Orchestrator, OrchestratorConfig};
use common::storage::ScheduleStore;
use common::telemetry::init_logging;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit status when settings or the schedule cannot be loaded
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "scheduler", version, about = "Run due ingestion jobs and apply their output to the index")]
struct Args {
    /// Directory holding default.toml and local.toml
    #[arg(long, env = "SCHEDULER_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Plan and run as if today were this date (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Report run/skip decisions without executing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("scheduler: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = init_logging(&settings.observability.log_level, settings.observability.json) {
        eprintln!("scheduler: {:#}", e);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    match run(&args, &settings).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "Scheduler could not start");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let settings = Settings::load_from_path(&args.config_dir)
        .with_context(|| format!("failed to load settings from {}", args.config_dir.display()))?;
    settings
        .validate()
        .map_err(ConfigError::InvalidSettings)?;
    Ok(settings)
}

async fn run(args: &Args, settings: &Settings) -> anyhow::Result<u8> {
    let today = args.date.unwrap_or_else(|| Local::now().date_naive());

    let store = ScheduleStore::new(settings.paths.schedule_file.clone());
    let mut schedule = store.load().await.context("failed to load schedule")?;

    info!(
        schedule_file = %store.path().display(),
        jobs = schedule.jobs.len(),
        run_date = %today,
        dry_run = args.dry_run,
        "Schedule loaded"
    );

    if args.dry_run {
        for planned in plan(&schedule, today) {
            match planned.decision {
                RunDecision::Run(reason) => println!("{}: run ({})", planned.job_id, reason),
                RunDecision::Skip(reason) => println!("{}: skip ({})", planned.job_id, reason),
            }
        }
        return Ok(0);
    }

    let gateway =
        ExternalIndexGateway::new(&settings.index).context("failed to build index gateway")?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from(&settings.paths),
        Arc::new(ProcessJobRunner::new()),
        Arc::new(gateway),
    );

    let summary = orchestrator.run_pass(&mut schedule, today).await;
    println!("{}", summary);

    Ok(summary.exit_code() as u8)
}
