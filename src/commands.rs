//! CLI command handlers.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use habsync_config::Config;
use habsync_reconciler::{CancelFlag, Pipeline, PipelineError, RunReport, StageName};
use tracing::{error, info, warn};

use crate::backends::Backends;
use crate::cli::{Cli, Commands};
use crate::input::load_desired_state;
use crate::logging;

type PipelineResult<T> = habsync_reconciler::Result<T>;

/// Exit code of a run that finished with entity-level failures.
pub const EXIT_ENTITY_FAILURES: u8 = 2;

/// Execute a CLI command.
///
/// # Errors
///
/// Returns configuration, input and foundational reconciliation failures.
pub async fn execute_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            stop_after,
            dry_run,
        } => {
            let config = load_config(&cli.main_config, cli.config.as_deref())?;
            logging::init(&config.log)?;
            cmd_run(&config, stop_after, dry_run).await
        }
        Commands::CheckConfig => {
            let config = load_config(&cli.main_config, cli.config.as_deref())?;
            cmd_check_config(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stages => {
            cmd_stages();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(main: &Path, override_file: Option<&Path>) -> Result<Config> {
    habsync_config::load(main, override_file)
        .with_context(|| format!("failed to load configuration from {}", main.display()))
}

/// Cancel the run on Ctrl+C. Mutations already applied stay.
fn cancel_on_ctrl_c() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl+C, stopping at the next entity");
            flag.cancel();
        }
    });
    cancel
}

async fn cmd_run(config: &Config, stop_after: Option<StageName>, dry_run: bool) -> Result<ExitCode> {
    let desired = load_desired_state(&config.stock.desired_state).await?;
    let backends = Backends::open(config).await?;

    let mut builder = Pipeline::builder()
        .with_config(config.reconciler_config(dry_run))
        .with_cancel(cancel_on_ctrl_c());
    if let Some(directory) = &backends.directory {
        builder = builder.with_directory(directory.clone());
    }
    if let Some(boards) = &backends.boards {
        builder = builder.with_boards(boards.clone());
    }
    let pipeline = builder.build()?;

    let result = match stop_after {
        Some(stage) => pipeline.stop_after(&desired, stage).await,
        None => pipeline.run(&desired).await,
    };

    let saved = if dry_run { Ok(()) } else { backends.save().await };
    finish(result, saved)
}

/// Report the run, then the snapshot write. A stopped run keeps its own
/// error even when the write failed too.
fn finish(result: PipelineResult<RunReport>, saved: Result<()>) -> Result<ExitCode> {
    match result {
        Ok(report) => {
            print_summary(&report);
            saved?;
            if report.has_failures() {
                print_failures(&report);
                return Ok(ExitCode::from(EXIT_ENTITY_FAILURES));
            }
            info!(run_id = %report.run_id, changes = report.changes(), "reconciliation finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if let Some(report) = e.report() {
                print_summary(report);
                print_failures(report);
            }
            if let Err(save_error) = saved {
                error!(error = %save_error, "snapshots not saved after the stopped run");
                eprintln!("snapshots not saved: {save_error:#}");
            }
            Err(anyhow::Error::new(e)).context("reconciliation stopped")
        }
    }
}

fn print_summary(report: &RunReport) {
    println!("{:<40} {:>8} {:>10} {:>9}", "stage", "changes", "unchanged", "failures");
    for stage in &report.stages {
        println!(
            "{:<40} {:>8} {:>10} {:>9}",
            stage.stage.as_str(),
            stage.changes,
            stage.unchanged,
            stage.failures.len()
        );
    }
}

fn print_failures(report: &RunReport) {
    for (stage, failure) in report.failures() {
        eprintln!("[{stage}] {failure}");
    }
}

fn cmd_check_config(config: &Config) {
    println!("configuration is valid");
    println!("  user stock:     {}", config.stock.desired_state.display());
    println!("  role clients:   {}", config.stock.role_clients.join(", "));
    println!("  max changes:    {}", config.stock.max_changes);
    println!("  directory:      {}", if config.directory.is_some() { "configured" } else { "none" });
    println!("  board system:   {}", if config.boards.is_some() { "configured" } else { "none" });
    println!("  clients:        {}", config.clients.len());
}

fn cmd_stages() {
    for stage in StageName::ALL {
        println!("{stage}");
    }
}

/// Whether an error stopped the run because of cancellation.
#[must_use]
pub fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<PipelineError>(),
        Some(PipelineError::StageFailed {
            source: habsync_core::Error::Cancelled,
            ..
        })
    )
}
