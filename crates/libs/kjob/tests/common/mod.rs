#![allow(dead_code)]
use std::{error::Error, sync::Arc, time::Duration};

use kjob::{
    RunConfig, RunOrchestrator, RunOutcome,
    cluster::memory::MemoryCluster,
    model::WorkloadHandle,
};
use kjob_config::{ContainerTemplate, RetryConfig, WorkloadSpec};
use kjob_io::sink::SharedSink;
use tokio::{io::AsyncReadExt, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn fast_config() -> RunConfig {
    RunConfig {
        retry: RetryConfig {
            initial_interval_ms: 5,
            multiplier: 1.5,
            max_interval_ms: 50,
            randomization_factor: 0.0,
        },
        log_buffer_size: 64,
    }
}

pub fn workload(name: &str, completions: Option<i32>, containers: &[&str]) -> WorkloadSpec {
    WorkloadSpec {
        namespace: String::from("default"),
        name: name.to_string(),
        completions,
        parallelism: None,
        backoff_limit: 0,
        selector: Default::default(),
        containers: containers
            .iter()
            .map(|name| ContainerTemplate {
                name: name.to_string(),
                image: String::from("alpine:3.20"),
                ..Default::default()
            })
            .collect(),
    }
}

/// A run executing in the background against an in-memory cluster.
pub struct TestRun {
    pub cluster: Arc<MemoryCluster>,
    pub cancel: CancellationToken,
    run: JoinHandle<RunOutcome>,
    output: JoinHandle<Vec<u8>>,
}

impl TestRun {
    pub fn start(spec: WorkloadSpec) -> Self {
        Self::start_on(Arc::new(MemoryCluster::new()), spec)
    }

    pub fn start_on(cluster: Arc<MemoryCluster>, spec: WorkloadSpec) -> Self {
        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let output = tokio::spawn(async move {
            let mut out = Vec::new();
            let _ = reader.read_to_end(&mut out).await;
            out
        });

        let cancel = CancellationToken::new();
        let orchestrator = RunOrchestrator::new(cluster.clone(), fast_config());
        let run_cancel = cancel.clone();
        let run = tokio::spawn(async move {
            orchestrator
                .run(&spec, SharedSink::new(writer), run_cancel)
                .await
        });
        Self {
            cluster,
            cancel,
            run,
            output,
        }
    }

    pub async fn handle(&self, name: &str) -> Result<WorkloadHandle, Box<dyn Error>> {
        Ok(timeout(TIMEOUT, self.cluster.wait_for_workload(name)).await?)
    }

    pub fn is_finished(&self) -> bool {
        self.run.is_finished()
    }

    /// Wait for the outcome and everything written to the output.
    pub async fn finish(self) -> Result<(RunOutcome, String), Box<dyn Error>> {
        self.finish_within(TIMEOUT).await
    }

    pub async fn finish_within(
        self,
        limit: Duration,
    ) -> Result<(RunOutcome, String), Box<dyn Error>> {
        let outcome = timeout(limit, self.run).await??;
        let output = timeout(TIMEOUT, self.output).await??;
        Ok((outcome, String::from_utf8(output)?))
    }
}
