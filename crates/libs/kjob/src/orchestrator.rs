//! A complete run: submit, stream, wait, tear down.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kjob_config::{KjobConfig, RetryConfig, WorkloadSpec};
use kjob_io::sink::SharedSink;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    cluster::{ClusterGateway, WatchEvent},
    completion::{Completion, CompletionWatcher},
    logs::LogStreamManager,
    model::RunOutcome,
    prelude::*,
    reconciler::PodReconciler,
    retry::{Attempt, ExponentialBackoff, RetryBody, with_interval},
};

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Backoff between reopenings of a closed watch.
    pub retry: RetryConfig,
    /// Copy buffer size of each log stream.
    pub log_buffer_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from(&KjobConfig::default())
    }
}

impl From<&KjobConfig> for RunConfig {
    fn from(config: &KjobConfig) -> Self {
        Self {
            retry: config.retry,
            log_buffer_size: config.logs.buffer_size,
        }
    }
}

/// Runs workloads on a cluster.
pub struct RunOrchestrator {
    gateway: Arc<dyn ClusterGateway>,
    config: RunConfig,
}

impl RunOrchestrator {
    pub fn new(gateway: Arc<dyn ClusterGateway>, config: RunConfig) -> Self {
        Self { gateway, config }
    }

    /// Create the workload described by `spec`, copy the logs of every
    /// container it runs into `sink` and wait until it completes.
    ///
    /// Firing `cancel` stops everything promptly and yields
    /// [`RunOutcome::Cancelled`]. `sink` is closed before returning, whatever
    /// the outcome.
    pub async fn run(
        &self,
        spec: &WorkloadSpec,
        sink: SharedSink,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let outcome = self.execute(spec, &sink, &cancel).await;
        if let Err(err) = sink.close().await {
            warn!("Failed to close output: {err}");
        }
        match &outcome {
            RunOutcome::Failed(err) => error!("Run of {spec} failed: {err}"),
            _ => info!("Run of {spec} finished: {outcome}"),
        }
        outcome
    }

    async fn execute(
        &self,
        spec: &WorkloadSpec,
        sink: &SharedSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        if let Err(err) = spec.validate() {
            return RunOutcome::Failed(err.into());
        }

        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RunOutcome::Cancelled,
            created = self.gateway.create_workload(spec) => match created {
                Ok(handle) => handle,
                Err(err) => {
                    return RunOutcome::Failed(Error::Submit {
                        name: spec.name.clone(),
                        source: Box::new(err),
                    });
                }
            },
        };
        info!("Created workload {handle} (uid {})", handle.uid);

        // everything below stops when the run returns
        let scope = cancel.child_token();
        let _scope_guard = scope.clone().drop_guard();
        let job_finished = scope.child_token();

        let (result_tx, result_rx) = oneshot::channel();
        let watcher = CompletionWatcher::new(self.gateway.clone(), handle.clone());
        let interval = Box::new(ExponentialBackoff::new(&self.config.retry));
        let watcher_scope = scope.clone();
        let watcher_finished = job_finished.clone();
        tokio::spawn(async move {
            let _finished = watcher_finished.drop_guard();
            let _ = result_tx.send(watcher.run(watcher_scope, interval).await);
        });

        let mut pod_loop = PodEventLoop {
            gateway: self.gateway.clone(),
            reconciler: PodReconciler::new(self.gateway.clone(), handle.clone()),
            streams: LogStreamManager::new(
                self.gateway.clone(),
                sink.clone(),
                scope.clone(),
                self.config.log_buffer_size,
            ),
        };
        // the first pass runs even if the workload is already finished, so
        // containers that terminated before being observed still get streamed
        let caught_up = tokio::select! {
            biased;
            _ = scope.cancelled() => return RunOutcome::Cancelled,
            complete = pod_loop.reconcile() => complete,
        };
        if !caught_up {
            let mut interval = ExponentialBackoff::new(&self.config.retry);
            match with_interval(&job_finished, &mut interval, &mut pod_loop).await {
                Ok(()) => debug!("Pods of {handle} reported completion"),
                Err(Error::Cancelled) if scope.is_cancelled() => return RunOutcome::Cancelled,
                Err(Error::Cancelled) => debug!("Workload {handle} finished"),
                Err(err) => warn!("Log streaming of {handle} stopped: {err}"),
            }
        }

        let watched = tokio::select! {
            biased;
            _ = scope.cancelled() => return RunOutcome::Cancelled,
            watched = result_rx => watched,
        };
        let watched = match watched {
            Ok(Err(Error::Cancelled)) => return RunOutcome::Cancelled,
            Ok(result) => result,
            Err(_) => Err(Error::WatcherLost),
        };

        // a failed workload still gets the tail of its logs
        debug!("Draining log streams of {handle}");
        match (pod_loop.streams.drain().await, watched) {
            (Err(Error::Cancelled), _) => RunOutcome::Cancelled,
            (_, Err(err)) => RunOutcome::Failed(err),
            (Err(err), Ok(())) => RunOutcome::Failed(err),
            (Ok(()), Ok(())) => RunOutcome::Success,
        }
    }
}

/// Foreground loop reacting to pod events.
///
/// Stops once a pass sees the workload complete, or when the retry loop
/// driving it is cancelled because the completion watcher finished.
struct PodEventLoop {
    gateway: Arc<dyn ClusterGateway>,
    reconciler: PodReconciler,
    streams: LogStreamManager,
}

impl PodEventLoop {
    /// Reconcile once. Returns whether the workload was seen complete.
    async fn reconcile(&mut self) -> bool {
        let pass = match self.reconciler.reconcile(&mut self.streams).await {
            Ok(pass) => pass,
            Err(err) => {
                warn!("Failed to list pods of {}: {err}", self.reconciler.handle());
                return false;
            }
        };
        match pass.completion {
            Ok(Completion::Complete) => true,
            Ok(_) => false,
            Err(err) => {
                warn!("Failed to read workload {}: {err}", self.reconciler.handle());
                false
            }
        }
    }
}

#[async_trait]
impl RetryBody for PodEventLoop {
    type Output = ();

    async fn attempt(&mut self) -> Attempt<()> {
        let handle = self.reconciler.handle().clone();
        let mut events = match self
            .gateway
            .watch_pods(&handle.namespace, &handle.selector)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                return Attempt::Fatal(Error::WatchOpen {
                    resource: format!("pods of workload {handle}"),
                    source: Box::new(err),
                });
            }
        };

        // pods may have progressed while the watch was down
        if self.reconcile().await {
            return Attempt::Done(());
        }
        while let Some(event) = events.next().await {
            if let WatchEvent::Error(message) = &event {
                debug!("Pod watch of {handle} reported: {message}");
            }
            if self.reconcile().await {
                return Attempt::Done(());
            }
        }
        Attempt::Retry(format!("Pod watch of {handle} closed"))
    }
}
