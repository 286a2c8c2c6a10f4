//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use habsync_config::DEFAULT_CONFIG_FILE;
use habsync_reconciler::StageName;

/// habsync - keep an identity directory and a board system in line with a user stock
#[derive(Parser, Debug)]
#[command(name = "habsync")]
#[command(version)]
#[command(
    about = "Converge an identity directory and a kanban board system towards a declared user stock"
)]
#[command(
    long_about = "habsync reads a desired user stock and creates, enables, disables and grants \
                  accounts in the identity directory and the board system until both match it. \
                  Every run is idempotent: a second run over the same stock changes nothing."
)]
pub struct Cli {
    /// Main configuration file; `config.d/*.toml` next to it is merged after it
    #[arg(long, env = "HABSYNC_MAIN_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub main_config: PathBuf,

    /// Override file merged last
    #[arg(short, long, env = "HABSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile both systems with the desired stock
    Run {
        /// Stop after this stage (see `habsync stages`)
        #[arg(long)]
        stop_after: Option<StageName>,

        /// Compute and log every plan without changing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// List the pipeline stages in execution order
    Stages,
}
