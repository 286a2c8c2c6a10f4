//! # habsync
//!
//! Entry point of the reconciliation CLI.
//!
//! ## Exit codes
//!
//! - `0`: the run finished without failures
//! - `1`: configuration, input or foundational failure; the error chain is printed
//! - `2`: the run finished but some entities could not be converged
//! - `130`: the run was cancelled with Ctrl+C

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::process::ExitCode;

use clap::Parser;

use habsync::cli::Cli;
use habsync::commands::{execute_command, is_cancelled};

const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute_command(cli).await {
        Ok(code) => code,
        Err(error) => {
            for (depth, cause) in error.chain().enumerate() {
                eprintln!("{depth}: {cause}");
            }
            if is_cancelled(&error) {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
