//! Command handlers for kjob.

use std::{path::Path, sync::Arc};

use kjob::{RunConfig, RunOrchestrator, RunOutcome};
use kjob_config::{KjobConfig, KjobUserWorkload, WorkloadSpec};
use kjob_io::sink::SharedSink;
use kjob_kube::KubeGateway;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::prelude::*;

/// Exit status of a run that was cancelled with Ctrl-C.
pub const EXIT_CANCELLED: u8 = 130;

/// Load the configuration file, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<KjobConfig> {
    match path {
        Some(path) => Ok(KjobConfig::from_file(path)?),
        None => Ok(KjobConfig::default()),
    }
}

/// Load a workload description and resolve it into a validated spec.
pub fn load_workload(path: &Path) -> Result<WorkloadSpec> {
    let workload = KjobUserWorkload::from_file(path)?;
    Ok(WorkloadSpec::from_user_workload(workload)?)
}

/// Exit status for a run outcome.
pub fn exit_status(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Success => 0,
        RunOutcome::Failed(_) => 1,
        RunOutcome::Cancelled => EXIT_CANCELLED,
    }
}

/// Handles the validate command.
///
/// Checks both the configuration file and the workload, then prints the
/// resolved workload as JSON.
pub fn handle_validate(config: Option<&Path>, workload: &Path) -> Result<u8> {
    load_config(config)?;
    let spec = load_workload(workload)?;
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(0)
}

/// Handles the run command.
///
/// Logs of every container go to stdout. Ctrl-C cancels the run.
pub async fn handle_run(
    config: Option<&Path>,
    workload: &Path,
    context: Option<String>,
) -> Result<u8> {
    let mut config = load_config(config)?;
    if context.is_some() {
        config.cluster.context = context;
    }
    let spec = load_workload(workload)?;

    let gateway = KubeGateway::connect(&config.cluster).await?;
    let orchestrator = RunOrchestrator::new(Arc::new(gateway), RunConfig::from(&config));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, cancelling run");
                interrupt.cancel();
            }
            Err(err) => warn!("Failed to listen for Ctrl-C: {err}"),
        }
    });

    let outcome = orchestrator
        .run(&spec, SharedSink::new(tokio::io::stdout()), cancel)
        .await;
    Ok(exit_status(&outcome))
}
