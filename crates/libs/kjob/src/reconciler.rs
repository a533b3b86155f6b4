//! Pod reconciliation: turn container transitions into log streams.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    cluster::ClusterGateway,
    completion::Completion,
    diff::diff_pod_sets,
    logs::LogStreamManager,
    model::{ContainerKey, ContainerState, PodSnapshot, WorkloadHandle},
    prelude::*,
};

/// Result of one reconciliation pass.
#[derive(Debug)]
pub struct Reconciliation {
    /// Containers whose log stream was started by this pass.
    pub started: Vec<ContainerKey>,
    /// Completion verdict read after the pods were processed.
    pub completion: Result<Completion>,
}

impl Reconciliation {
    /// Whether the workload was seen complete by this pass.
    pub fn is_complete(&self) -> bool {
        matches!(self.completion, Ok(Completion::Complete))
    }
}

/// Tracks the pods of one workload across reconciliation passes.
///
/// The retained snapshot survives pod watch resubscriptions, so a container
/// already handled is never reported again.
pub struct PodReconciler {
    gateway: Arc<dyn ClusterGateway>,
    handle: WorkloadHandle,
    snapshot: PodSnapshot,
}

impl PodReconciler {
    pub fn new(gateway: Arc<dyn ClusterGateway>, handle: WorkloadHandle) -> Self {
        Self {
            gateway,
            handle,
            snapshot: PodSnapshot::new(),
        }
    }

    pub fn handle(&self) -> &WorkloadHandle {
        &self.handle
    }

    /// Pods retained from the last successful pass.
    pub fn snapshot(&self) -> &PodSnapshot {
        &self.snapshot
    }

    /// List the workload's pods, start the log streams of containers that
    /// became running and read the workload's completion.
    ///
    /// Containers already terminated are only streamed while no stream was
    /// started for the run, which catches up with pods that finished before
    /// the run observed them.
    ///
    /// Fails when the pods cannot be listed; the retained snapshot is kept
    /// unchanged in that case.
    pub async fn reconcile(&mut self, streams: &mut LogStreamManager) -> Result<Reconciliation> {
        let pods = self
            .gateway
            .list_pods(&self.handle.namespace, &self.handle.selector)
            .await?;
        let current = PodSnapshot::owned_by(&self.handle, pods);
        trace!("Reconciling {} pods of {}", current.len(), self.handle);

        let catching_up = !streams.has_started_any();
        let mut started = Vec::new();
        for diff in diff_pod_sets(&self.snapshot, &current) {
            for status in &diff.containers {
                let key = ContainerKey::new(&diff.pod.name, &status.name);
                debug!("Container {key} is {}", status.state);
                if !should_stream(&status.state, catching_up) {
                    continue;
                }
                if streams.start_stream(&self.handle.namespace, key.clone()).is_some() {
                    started.push(key);
                }
            }
        }
        self.snapshot = current;

        let completion = self
            .gateway
            .get_workload(&self.handle)
            .await
            .map(|status| Completion::evaluate(&status));
        Ok(Reconciliation { started, completion })
    }
}

fn should_stream(state: &ContainerState, catching_up: bool) -> bool {
    match state {
        ContainerState::Running => true,
        ContainerState::Terminated { .. } => catching_up,
        ContainerState::Waiting { .. } => false,
    }
}
