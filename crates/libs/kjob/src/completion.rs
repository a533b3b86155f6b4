//! Background watch of the workload until it reaches completion.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cluster::{ClusterGateway, WatchEvent},
    model::{WorkloadHandle, WorkloadStatus},
    prelude::*,
    retry::{Attempt, Interval, RetryBody, with_interval},
};

/// Completion verdict for one observation of the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Enough pods succeeded.
    Complete,
    /// Still running.
    Pending {
        /// Pods that exited successfully so far.
        succeeded: i32,
        /// Pods currently running.
        active: i32,
    },
    /// The cluster gave up on the workload.
    Failed(String),
}

impl Completion {
    /// Evaluate a status. A reported failure wins over the counters.
    pub fn evaluate(status: &WorkloadStatus) -> Self {
        if let Some(reason) = &status.failure {
            return Self::Failed(reason.clone());
        }
        if status.is_complete() {
            return Self::Complete;
        }
        Self::Pending {
            succeeded: status.succeeded,
            active: status.active,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Where the watcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Waiting on the watch channel.
    Watching,
    /// Reading the workload after a trigger.
    Evaluating,
    /// The workload completed.
    Complete,
    /// The watcher stopped on an error.
    Fatal,
}

/// Watches a workload and reports when it completes.
pub struct CompletionWatcher {
    gateway: Arc<dyn ClusterGateway>,
    handle: WorkloadHandle,
    state: WatcherState,
}

impl CompletionWatcher {
    pub fn new(gateway: Arc<dyn ClusterGateway>, handle: WorkloadHandle) -> Self {
        Self {
            gateway,
            handle,
            state: WatcherState::Watching,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Watch until completion, reopening the watch with backoff whenever the
    /// channel closes.
    ///
    /// Returns `Ok(())` once the workload is complete, [`Error::Cancelled`]
    /// when `cancel` fires and the fatal error otherwise.
    pub async fn run(mut self, cancel: CancellationToken, mut interval: Box<dyn Interval>) -> Result<()> {
        let result = with_interval(&cancel, interval.as_mut(), &mut self).await;
        match &result {
            Ok(()) => info!("Workload {} completed", self.handle),
            Err(Error::Cancelled) => debug!("Completion watch of {} cancelled", self.handle),
            Err(err) => warn!("Completion watch of {} failed: {err}", self.handle),
        }
        result
    }

    /// Read the workload and turn it into an attempt outcome, or `None` to
    /// keep watching.
    ///
    /// A failed read retries the whole attempt after backoff, which
    /// re-evaluates on reopening instead of waiting for another event.
    async fn evaluate(&mut self) -> Option<Attempt<()>> {
        self.state = WatcherState::Evaluating;
        let status = match self.gateway.get_workload(&self.handle).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Failed to read workload {}: {err}", self.handle);
                self.state = WatcherState::Watching;
                return Some(Attempt::Retry(format!("Read of workload {} failed", self.handle)));
            }
        };
        match Completion::evaluate(&status) {
            Completion::Complete => {
                self.state = WatcherState::Complete;
                Some(Attempt::Done(()))
            }
            Completion::Failed(reason) => {
                self.state = WatcherState::Fatal;
                Some(Attempt::Fatal(Error::WorkloadFailed {
                    name: self.handle.name.clone(),
                    reason,
                }))
            }
            Completion::Pending { succeeded, active } => {
                debug!(
                    "Workload {} not complete yet: {succeeded} succeeded, {active} active",
                    self.handle
                );
                self.state = WatcherState::Watching;
                None
            }
        }
    }
}

#[async_trait]
impl RetryBody for CompletionWatcher {
    type Output = ();

    async fn attempt(&mut self) -> Attempt<()> {
        self.state = WatcherState::Watching;
        let mut events = match self.gateway.watch_workload(&self.handle).await {
            Ok(events) => events,
            Err(err) => {
                self.state = WatcherState::Fatal;
                return Attempt::Fatal(Error::WatchOpen {
                    resource: format!("workload {}", self.handle),
                    source: Box::new(err),
                });
            }
        };

        // the workload may already be done before the first event arrives
        if let Some(outcome) = self.evaluate().await {
            return outcome;
        }
        while let Some(event) = events.next().await {
            if let WatchEvent::Error(message) = &event {
                debug!("Watch of workload {} reported: {message}", self.handle);
            }
            if let Some(outcome) = self.evaluate().await {
                return outcome;
            }
        }
        Attempt::Retry(format!("Watch of workload {} closed", self.handle))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kjob_config::{RetryConfig, WorkloadSpec};
    use tokio::time::timeout;

    use super::*;
    use crate::{cluster::memory::MemoryCluster, retry::ExponentialBackoff};

    fn backoff() -> Box<dyn Interval> {
        Box::new(ExponentialBackoff::new(&RetryConfig {
            initial_interval_ms: 5,
            multiplier: 1.5,
            max_interval_ms: 20,
            randomization_factor: 0.0,
        }))
    }

    async fn setup(completions: Option<i32>) -> (Arc<MemoryCluster>, WorkloadHandle) {
        let cluster = Arc::new(MemoryCluster::new());
        let spec = WorkloadSpec {
            namespace: String::from("default"),
            name: String::from("watched"),
            completions,
            parallelism: None,
            backoff_limit: 0,
            selector: Default::default(),
            containers: Vec::new(),
        };
        let handle = cluster.create_workload(&spec).await.unwrap();
        (cluster, handle)
    }

    #[test]
    fn evaluation_table() {
        let status = |succeeded, active, completions| WorkloadStatus {
            succeeded,
            active,
            completions,
            ..Default::default()
        };
        assert_eq!(
            Completion::evaluate(&status(1, 1, None)),
            Completion::Pending {
                succeeded: 1,
                active: 1
            }
        );
        assert_eq!(Completion::evaluate(&status(2, 0, None)), Completion::Complete);
        assert_eq!(Completion::evaluate(&status(3, 2, Some(3))), Completion::Complete);

        let mut failed = status(3, 0, Some(3));
        failed.failure = Some(String::from("BackoffLimitExceeded"));
        assert_eq!(
            Completion::evaluate(&failed),
            Completion::Failed(String::from("BackoffLimitExceeded"))
        );
    }

    #[tokio::test]
    async fn completes_on_status_update() {
        let (cluster, handle) = setup(None).await;
        let watcher = CompletionWatcher::new(cluster.clone(), handle.clone());
        let task = tokio::spawn(watcher.run(CancellationToken::new(), backoff()));

        cluster.set_counts(&handle, 1, 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cluster.set_counts(&handle, 2, 0);
        timeout(Duration::from_secs(5), task)
            .await
            .expect("watcher should complete")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn already_complete_workload_finishes_immediately() {
        let (cluster, handle) = setup(Some(1)).await;
        cluster.set_counts(&handle, 1, 0);
        let mut watcher = CompletionWatcher::new(cluster.clone(), handle);
        let attempt = watcher.attempt().await;
        assert!(matches!(attempt, Attempt::Done(())));
        assert_eq!(watcher.state(), WatcherState::Complete);
    }

    #[tokio::test]
    async fn closed_watch_is_reopened() {
        let (cluster, handle) = setup(Some(1)).await;
        let watcher = CompletionWatcher::new(cluster.clone(), handle.clone());
        let task = tokio::spawn(watcher.run(CancellationToken::new(), backoff()));

        timeout(Duration::from_secs(5), cluster.wait_for_workload_watches(1))
            .await
            .unwrap();
        cluster.close_watches();
        timeout(Duration::from_secs(5), cluster.wait_for_workload_watches(2))
            .await
            .unwrap();
        cluster.set_counts(&handle, 1, 0);

        timeout(Duration::from_secs(5), task)
            .await
            .expect("watcher should complete after reopening")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failed_read_is_retried_without_new_events() {
        let (cluster, handle) = setup(Some(1)).await;
        cluster.set_counts(&handle, 1, 0);
        cluster.fail_workload_reads(1);

        let watcher = CompletionWatcher::new(cluster.clone(), handle);
        timeout(Duration::from_secs(5), watcher.run(CancellationToken::new(), backoff()))
            .await
            .expect("watcher should re-read after backoff")
            .unwrap();
        assert_eq!(cluster.workload_watch_count(), 2);
    }

    #[tokio::test]
    async fn watch_open_failure_is_fatal() {
        let (cluster, handle) = setup(Some(1)).await;
        cluster.fail_workload_watch("forbidden");
        let watcher = CompletionWatcher::new(cluster.clone(), handle);
        let err = watcher
            .run(CancellationToken::new(), backoff())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WatchOpen { .. }));
    }

    #[tokio::test]
    async fn failed_workload_is_fatal() {
        let (cluster, handle) = setup(Some(1)).await;
        cluster.set_workload_status(
            &handle,
            WorkloadStatus {
                failed: 1,
                completions: Some(1),
                failure: Some(String::from("BackoffLimitExceeded")),
                ..Default::default()
            },
        );
        let mut watcher = CompletionWatcher::new(cluster.clone(), handle);
        let attempt = watcher.attempt().await;
        assert!(matches!(attempt, Attempt::Fatal(Error::WorkloadFailed { .. })));
        assert_eq!(watcher.state(), WatcherState::Fatal);
    }

    #[tokio::test]
    async fn cancellation_stops_the_watch() {
        let (cluster, handle) = setup(Some(1)).await;
        let cancel = CancellationToken::new();
        let watcher = CompletionWatcher::new(cluster.clone(), handle);
        let task = tokio::spawn(watcher.run(cancel.clone(), backoff()));
        cancel.cancel();
        let err = timeout(Duration::from_secs(5), task)
            .await
            .expect("cancel should be prompt")
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
