//! kjob command-line runner.
//!
//! Submits a workload to a Kubernetes cluster, streams the logs of every
//! container it runs to stdout and exits once the workload completes:
//!
//! - **validate**: resolve and check a workload description
//! - **run**: run it to completion
//!
//! Diagnostics go to stderr; `RUST_LOG` overrides the default filter.

mod cli;
mod commands;
mod error;
mod prelude;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{handle_run, handle_validate};
use crate::prelude::*;

/// Main entry point for kjob.
///
/// # Examples
///
/// ```bash
/// # Check a workload description
/// kjob validate --workload build.toml
///
/// # Run it with a custom configuration
/// kjob --config kjob.toml run --workload build.toml
/// ```
#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kjob=info,kjob_kube=info,kjob_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let status = match cli.command {
        Commands::Validate { workload } => handle_validate(cli.config.as_deref(), &workload)?,
        Commands::Run { workload, context } => {
            handle_run(cli.config.as_deref(), &workload, context).await?
        }
    };
    Ok(ExitCode::from(status))
}
