use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lmr_sync::{PassOutcome, ReconcileOptions, SyncConfig};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lmr-cli")]
#[command(about = "Launch manifest reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation pass against the live manifest and catalog.
    Sync {
        /// Compute updates without dispatching them.
        #[arg(long)]
        dry_run: bool,
        /// Print the pass report as JSON instead of a summary line.
        #[arg(long)]
        json: bool,
    },
    /// Replay a pass offline from manifest.html, launches.json and launchpads.json.
    Replay {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run passes on the SYNC_CRON schedule until interrupted.
    Watch,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LMR_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

fn print_outcome(outcome: &PassOutcome, json: bool) -> Result<()> {
    let report = outcome.report();
    if json {
        println!("{}", serde_json::to_string_pretty(report).context("serializing pass report")?);
        return Ok(());
    }
    let status = match outcome.error() {
        None => "complete".to_string(),
        Some(err) => format!("aborted ({})", err.code()),
    };
    println!(
        "reconcile {status}: run_id={} rows={} base_flight_number={} updates={} dry_run={}",
        report.run_id,
        report.manifest_rows,
        report
            .base_flight_number
            .map_or_else(|| "-".to_string(), |n| n.to_string()),
        report.updates.len(),
        report.dry_run
    );
    Ok(())
}

async fn watch(config: &SyncConfig) -> Result<()> {
    let reconciler = Arc::new(lmr_sync::reconciler_from_config(config)?);
    let mut sched = lmr_sync::build_scheduler(reconciler, &config.sync_cron, config.reports_dir.clone()).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.sync_cron, "scheduler started");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        json: false,
    }) {
        Commands::Sync { dry_run, json } => {
            let mut config = SyncConfig::from_env();
            config.dry_run |= dry_run;
            let outcome = lmr_sync::run_once(&config).await?;
            print_outcome(&outcome, json)?;
            if config.scheduler_enabled && !dry_run {
                watch(&config).await?;
            }
        }
        Commands::Replay { dir, json } => {
            let config = SyncConfig::from_env();
            let options = ReconcileOptions {
                max_rows: config.max_rows,
                ..ReconcileOptions::default()
            };
            let (outcome, _store) = lmr_sync::replay_fixture_dir(&dir, options).await?;
            lmr_sync::persist_report(config.reports_dir.as_deref(), outcome.report()).await;
            print_outcome(&outcome, json)?;
        }
        Commands::Watch => watch(&SyncConfig::from_env()).await?,
    }

    Ok(())
}
