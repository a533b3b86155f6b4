//! Command-line interface for kjob.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface for kjob.
#[derive(Parser)]
#[command(name = "kjob")]
#[command(about = "kjob - Run a batch workload on a cluster and stream the logs of every container")]
pub struct Cli {
    /// Path to the configuration file. Defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and validate a workload description, then print it as JSON
    Validate {
        /// Path to the workload description
        #[arg(short, long)]
        workload: PathBuf,
    },
    /// Submit the workload, stream its logs to stdout and wait for completion
    Run {
        /// Path to the workload description
        #[arg(short, long)]
        workload: PathBuf,

        /// Kubeconfig context, overrides the configuration file
        #[arg(long)]
        context: Option<String>,
    },
}
