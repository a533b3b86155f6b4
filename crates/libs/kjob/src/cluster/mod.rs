//! Capability surface over the cluster API.
//!
//! A run only needs the handful of operations of [`ClusterGateway`]. The
//! Kubernetes implementation lives in the `kjob-kube` crate and
//! [`memory::MemoryCluster`] provides a scriptable in-process cluster.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use crate::{
    model::{ContainerKey, Labels, PodSummary, WorkloadHandle, WorkloadStatus},
    prelude::*,
};
use kjob_config::WorkloadSpec;

pub mod memory;

/// Event delivered by a watch subscription.
///
/// Runs only use events as triggers to re-read state, so they carry the name
/// of the object that changed rather than the object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Object created.
    Added(String),
    /// Object updated.
    Modified(String),
    /// Object deleted.
    Deleted(String),
    /// The server reported an error on the watch.
    Error(String),
}

/// Stream of watch events. The end of the stream means the watch channel closed.
pub type EventStream = BoxStream<'static, WatchEvent>;

/// Following byte stream of one container's logs.
///
/// Dropping the stream closes it.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Cluster operations consumed by a run.
#[async_trait]
pub trait ClusterGateway: Send + Sync + 'static {
    /// Create the workload described by `spec`.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle>;

    /// Read the workload's current counters.
    async fn get_workload(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus>;

    /// Watch the workload object.
    async fn watch_workload(&self, handle: &WorkloadHandle) -> Result<EventStream>;

    /// List pods of `namespace` matching every label of `selector`.
    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<PodSummary>>;

    /// Watch pods of `namespace` matching every label of `selector`.
    async fn watch_pods(&self, namespace: &str, selector: &Labels) -> Result<EventStream>;

    /// Open a following log stream for one container.
    async fn open_log_stream(&self, namespace: &str, container: &ContainerKey) -> Result<LogStream>;
}
