//! Data model shared by every component of a run.

use std::{
    collections::{BTreeMap, btree_map},
    fmt,
};

use crate::prelude::*;

/// Key/value labels, also used as match-label selectors.
pub type Labels = BTreeMap<String, String>;

/// Kind of the workloads created by kjob.
pub const KIND_JOB: &str = "Job";

/// Identifies a created workload.
///
/// Correlation key for every watch and owner-reference check of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadHandle {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Unique identity assigned by the cluster.
    pub uid: String,
    /// Object kind.
    pub kind: String,
    /// Selector matching the workload's pods.
    pub selector: Labels,
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Workload counters as reported by the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Pods that exited successfully.
    pub succeeded: i32,
    /// Pods currently running.
    pub active: i32,
    /// Pods that failed.
    pub failed: i32,
    /// Required completion count, when the workload specifies one.
    pub completions: Option<i32>,
    /// Set once the cluster has given up on the workload.
    pub failure: Option<String>,
}

impl WorkloadStatus {
    /// Completion predicate. See [`is_complete`].
    pub fn is_complete(&self) -> bool {
        is_complete(self.succeeded, self.active, self.completions)
    }
}

/// Completion predicate.
///
/// Without a completion count the workload is complete once any pod succeeded
/// and none is active. With a completion count `k` it is complete once `k`
/// pods succeeded, whatever the number of active pods.
pub fn is_complete(succeeded: i32, active: i32, completions: Option<i32>) -> bool {
    match completions {
        None => succeeded > 0 && active == 0,
        Some(completions) => succeeded >= completions,
    }
}

/// Back-link from a pod to the object that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerReference {
    /// Owner kind.
    pub kind: String,
    /// Owner name.
    pub name: String,
    /// Owner identity.
    pub uid: String,
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Not started yet.
    Waiting {
        /// Why the container is waiting, e.g. `ContainerCreating`.
        reason: Option<String>,
    },
    /// Running.
    Running,
    /// Exited.
    Terminated {
        /// Process exit code.
        exit_code: i32,
        /// Termination reason, e.g. `Completed`.
        reason: Option<String>,
    },
}

impl ContainerState {
    /// Waiting without a reason.
    pub fn waiting() -> Self {
        Self::Waiting { reason: None }
    }

    /// Terminated with `exit_code` and no reason.
    pub fn terminated(exit_code: i32) -> Self {
        Self::Terminated {
            exit_code,
            reason: None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting { reason: Some(reason) } => write!(f, "waiting ({reason})"),
            Self::Waiting { reason: None } => write!(f, "waiting"),
            Self::Running => write!(f, "running"),
            Self::Terminated { exit_code, .. } => write!(f, "terminated (exit {exit_code})"),
        }
    }
}

/// Status of one container of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, state: ContainerState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

/// Summary of a pod as needed by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod labels.
    pub labels: Labels,
    /// Owner references.
    pub owner_references: Vec<OwnerReference>,
    /// Per-container status, in pod spec order.
    pub containers: Vec<ContainerStatus>,
}

impl PodSummary {
    /// Whether one of the owner references points at `handle`.
    pub fn is_owned_by(&self, handle: &WorkloadHandle) -> bool {
        self.owner_references
            .iter()
            .any(|owner| owner.kind == handle.kind && owner.uid == handle.uid)
    }

    /// Whether the pod carries every label of `selector`.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }

    /// Status of the container called `name`.
    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Pods of one workload keyed by pod name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSnapshot {
    pods: BTreeMap<String, PodSummary>,
}

impl PodSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from listed pods, keeping only those owned by `handle`.
    pub fn owned_by(handle: &WorkloadHandle, pods: impl IntoIterator<Item = PodSummary>) -> Self {
        pods.into_iter()
            .filter(|pod| pod.is_owned_by(handle))
            .collect()
    }

    pub fn insert(&mut self, pod: PodSummary) -> Option<PodSummary> {
        self.pods.insert(pod.name.clone(), pod)
    }

    pub fn get(&self, name: &str) -> Option<&PodSummary> {
        self.pods.get(name)
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Pods in name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, PodSummary> {
        self.pods.values()
    }
}

impl FromIterator<PodSummary> for PodSnapshot {
    fn from_iter<T: IntoIterator<Item = PodSummary>>(iter: T) -> Self {
        let mut snapshot = Self::new();
        for pod in iter {
            snapshot.insert(pod);
        }
        snapshot
    }
}

/// A (pod, container) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerKey {
    /// Pod name.
    pub pod: String,
    /// Container name.
    pub container: String,
}

impl ContainerKey {
    pub fn new(pod: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container)
    }
}

/// Render match labels as a label selector query, e.g. `app=web,tier=db`.
pub fn format_selector(selector: &Labels) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Terminal result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The workload completed.
    Success,
    /// The run aborted on a fatal error.
    Failed(Error),
    /// The caller cancelled the run.
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
