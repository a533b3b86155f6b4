//! Delta between two snapshots of a workload's pods.

use crate::model::{ContainerStatus, PodSnapshot, PodSummary};

/// Container-status transitions observed for one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDiff {
    /// Current version of the pod.
    pub pod: PodSummary,
    /// Container statuses that are new or changed since the previous snapshot.
    pub containers: Vec<ContainerStatus>,
    /// The pod was absent from the previous snapshot.
    pub is_new: bool,
}

/// Compute the transitions from `previous` to `current`.
///
/// A pod absent from `previous` is reported with every container status. A
/// known pod is reported with the containers whose status value changed, and
/// omitted when nothing changed. Pods that disappeared are not reported.
/// Output follows pod name order.
pub fn diff_pod_sets(previous: &PodSnapshot, current: &PodSnapshot) -> Vec<PodDiff> {
    let mut diffs = Vec::new();
    for pod in current.iter() {
        match previous.get(&pod.name) {
            None => diffs.push(PodDiff {
                pod: pod.clone(),
                containers: pod.containers.clone(),
                is_new: true,
            }),
            Some(old) => {
                let containers: Vec<ContainerStatus> = pod
                    .containers
                    .iter()
                    .filter(|status| old.container(&status.name) != Some(*status))
                    .cloned()
                    .collect();
                if !containers.is_empty() {
                    diffs.push(PodDiff {
                        pod: pod.clone(),
                        containers,
                        is_new: false,
                    });
                }
            }
        }
    }
    diffs
}
