//! In-process cluster.
//!
//! [`MemoryCluster`] keeps workloads, pods and container log streams in memory
//! and lets the test suite script every change a real cluster would make:
//! pod status transitions, workload counters, log bytes, watch channel
//! closures and API failures.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tracing::trace;
use uuid::Uuid;

use super::{ClusterGateway, EventStream, LogStream, WatchEvent};
use crate::{
    model::{
        ContainerKey, ContainerState, ContainerStatus, KIND_JOB, Labels, OwnerReference,
        PodSummary, WorkloadHandle, WorkloadStatus,
    },
    prelude::*,
};
use kjob_config::WorkloadSpec;

/// Label put on every pod of a workload by [`MemoryCluster`].
pub const JOB_NAME_LABEL: &str = "job-name";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum LogChunk {
    Data(Vec<u8>),
    Error(String),
}

struct ChannelReader {
    rx: UnboundedReceiver<LogChunk>,
    pending: Vec<u8>,
    pos: usize,
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if this.pos < this.pending.len() {
                let n = buf.remaining().min(this.pending.len() - this.pos);
                buf.put_slice(&this.pending[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(LogChunk::Data(data))) => {
                    this.pending = data;
                    this.pos = 0;
                }
                Poll::Ready(Some(LogChunk::Error(message))) => {
                    return Poll::Ready(Err(io::Error::other(message)));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

struct LogSlot {
    tx: Option<UnboundedSender<LogChunk>>,
    reader: Option<ChannelReader>,
}

impl LogSlot {
    fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx: Some(tx),
            reader: Some(ChannelReader {
                rx,
                pending: Vec::new(),
                pos: 0,
            }),
        }
    }
}

struct StoredWorkload {
    handle: WorkloadHandle,
    status: WorkloadStatus,
}

struct PodWatcher {
    namespace: String,
    selector: Labels,
    tx: UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Failures {
    create: Option<String>,
    workload_watch: Option<String>,
    pod_watch: Option<String>,
    workload_reads: usize,
}

#[derive(Default)]
struct State {
    workloads: BTreeMap<String, StoredWorkload>,
    pods: BTreeMap<String, PodSummary>,
    logs: HashMap<ContainerKey, LogSlot>,
    workload_watchers: Vec<(String, UnboundedSender<WatchEvent>)>,
    pod_watchers: Vec<PodWatcher>,
    opened_logs: Vec<ContainerKey>,
    workload_watch_count: usize,
    pod_watch_count: usize,
    failures: Failures,
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn event_stream(rx: UnboundedReceiver<WatchEvent>) -> EventStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .boxed()
}

/// Build a pod owned by `handle`, labelled with its selector.
pub fn owned_pod(
    handle: &WorkloadHandle,
    name: &str,
    containers: &[(&str, ContainerState)],
) -> PodSummary {
    PodSummary {
        name: name.to_string(),
        namespace: handle.namespace.clone(),
        labels: handle.selector.clone(),
        owner_references: vec![OwnerReference {
            kind: handle.kind.clone(),
            name: handle.name.clone(),
            uid: handle.uid.clone(),
        }],
        containers: containers
            .iter()
            .map(|(name, state)| ContainerStatus::new(*name, state.clone()))
            .collect(),
    }
}

/// Scriptable in-memory [`ClusterGateway`].
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following workload creation fail with `message`.
    pub fn fail_create(&self, message: &str) {
        self.state().failures.create = Some(message.to_string());
    }

    /// Make every following workload watch fail to open with `message`.
    pub fn fail_workload_watch(&self, message: &str) {
        self.state().failures.workload_watch = Some(message.to_string());
    }

    /// Make every following pod watch fail to open with `message`.
    pub fn fail_pod_watch(&self, message: &str) {
        self.state().failures.pod_watch = Some(message.to_string());
    }

    /// Make the next `count` workload reads fail.
    pub fn fail_workload_reads(&self, count: usize) {
        self.state().failures.workload_reads = count;
    }

    /// Handle of the workload called `name`, once created.
    pub fn workload(&self, name: &str) -> Option<WorkloadHandle> {
        self.state()
            .workloads
            .values()
            .find(|stored| stored.handle.name == name)
            .map(|stored| stored.handle.clone())
    }

    /// Wait until the workload called `name` was created.
    pub async fn wait_for_workload(&self, name: &str) -> WorkloadHandle {
        loop {
            if let Some(handle) = self.workload(name) {
                return handle;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Replace the workload counters and notify workload watchers.
    pub fn set_workload_status(&self, handle: &WorkloadHandle, status: WorkloadStatus) {
        let mut state = self.state();
        let key = object_key(&handle.namespace, &handle.name);
        if let Some(stored) = state.workloads.get_mut(&key) {
            stored.status = status;
        }
        state
            .workload_watchers
            .retain(|(watched, tx)| *watched != key || tx.send(WatchEvent::Modified(handle.name.clone())).is_ok());
    }

    /// Update succeeded/active counters, keeping everything else.
    pub fn set_counts(&self, handle: &WorkloadHandle, succeeded: i32, active: i32) {
        let mut status = self.workload_status(handle).unwrap_or_default();
        status.succeeded = succeeded;
        status.active = active;
        self.set_workload_status(handle, status);
    }

    /// Current counters of a workload.
    pub fn workload_status(&self, handle: &WorkloadHandle) -> Option<WorkloadStatus> {
        self.state()
            .workloads
            .get(&object_key(&handle.namespace, &handle.name))
            .map(|stored| stored.status.clone())
    }

    /// Create or replace a pod and notify matching pod watchers.
    ///
    /// Every container of the pod gets a log stream, open for writing until
    /// [`MemoryCluster::finish_log`] is called.
    pub fn upsert_pod(&self, pod: PodSummary) {
        let mut state = self.state();
        for container in &pod.containers {
            state
                .logs
                .entry(ContainerKey::new(&pod.name, &container.name))
                .or_insert_with(LogSlot::new);
        }
        let key = object_key(&pod.namespace, &pod.name);
        let event = if state.pods.contains_key(&key) {
            WatchEvent::Modified(pod.name.clone())
        } else {
            WatchEvent::Added(pod.name.clone())
        };
        state.pod_watchers.retain(|watcher| {
            if watcher.namespace != pod.namespace || !pod.matches(&watcher.selector) {
                return true;
            }
            watcher.tx.send(event.clone()).is_ok()
        });
        trace!("Pod {key} updated");
        state.pods.insert(key, pod);
    }

    /// Set the state of one container of an existing pod.
    pub fn set_container_state(&self, namespace: &str, key: &ContainerKey, state: ContainerState) {
        let pod = self
            .state()
            .pods
            .get(&object_key(namespace, &key.pod))
            .cloned();
        if let Some(mut pod) = pod {
            match pod.containers.iter_mut().find(|c| c.name == key.container) {
                Some(status) => status.state = state,
                None => pod
                    .containers
                    .push(ContainerStatus::new(&key.container, state)),
            }
            self.upsert_pod(pod);
        }
    }

    /// Append bytes to a container's log stream.
    pub fn write_log(&self, key: &ContainerKey, data: &[u8]) {
        if let Some(tx) = self.state().logs.get(key).and_then(|slot| slot.tx.as_ref()) {
            let _ = tx.send(LogChunk::Data(data.to_vec()));
        }
    }

    /// Make the next read of a container's log stream fail with `message`.
    pub fn fail_log(&self, key: &ContainerKey, message: &str) {
        if let Some(tx) = self.state().logs.get(key).and_then(|slot| slot.tx.as_ref()) {
            let _ = tx.send(LogChunk::Error(message.to_string()));
        }
    }

    /// End a container's log stream after the bytes already written.
    pub fn finish_log(&self, key: &ContainerKey) {
        if let Some(slot) = self.state().logs.get_mut(key) {
            slot.tx = None;
        }
    }

    /// Containers whose log stream was opened, in opening order.
    pub fn opened_log_streams(&self) -> Vec<ContainerKey> {
        self.state().opened_logs.clone()
    }

    /// Wait until at least `count` log streams were opened.
    pub async fn wait_for_log_streams(&self, count: usize) {
        while self.state().opened_logs.len() < count {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Number of workload watches opened so far.
    pub fn workload_watch_count(&self) -> usize {
        self.state().workload_watch_count
    }

    /// Wait until at least `count` workload watches were opened.
    pub async fn wait_for_workload_watches(&self, count: usize) {
        while self.state().workload_watch_count < count {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Number of pod watches opened so far.
    pub fn pod_watch_count(&self) -> usize {
        self.state().pod_watch_count
    }

    /// Wait until at least `count` pod watches were opened.
    pub async fn wait_for_pod_watches(&self, count: usize) {
        while self.state().pod_watch_count < count {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Close every open watch channel, as a server-side timeout would.
    pub fn close_watches(&self) {
        let mut state = self.state();
        state.workload_watchers.clear();
        state.pod_watchers.clear();
    }

    /// Close open pod watch channels only.
    pub fn close_pod_watches(&self) {
        self.state().pod_watchers.clear();
    }
}

#[async_trait]
impl ClusterGateway for MemoryCluster {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadHandle> {
        let mut state = self.state();
        if let Some(message) = &state.failures.create {
            return Err(Error::cluster(message.clone()));
        }
        let key = object_key(&spec.namespace, &spec.name);
        if state.workloads.contains_key(&key) {
            return Err(Error::cluster(format!("workload {key} already exists")));
        }

        let mut selector = spec.selector.clone();
        selector.insert(String::from(JOB_NAME_LABEL), spec.name.clone());
        let handle = WorkloadHandle {
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            uid: Uuid::new_v4().to_string(),
            kind: String::from(KIND_JOB),
            selector,
        };
        let status = WorkloadStatus {
            completions: spec.completions,
            ..Default::default()
        };
        state.workloads.insert(
            key,
            StoredWorkload {
                handle: handle.clone(),
                status,
            },
        );
        Ok(handle)
    }

    async fn get_workload(&self, handle: &WorkloadHandle) -> Result<WorkloadStatus> {
        {
            let mut state = self.state();
            if state.failures.workload_reads > 0 {
                state.failures.workload_reads -= 1;
                return Err(Error::cluster(format!("workload {handle} unavailable")));
            }
        }
        self.workload_status(handle)
            .ok_or_else(|| Error::cluster(format!("workload {handle} not found")))
    }

    async fn watch_workload(&self, handle: &WorkloadHandle) -> Result<EventStream> {
        let mut state = self.state();
        if let Some(message) = &state.failures.workload_watch {
            return Err(Error::cluster(message.clone()));
        }
        let (tx, rx) = unbounded_channel();
        state
            .workload_watchers
            .push((object_key(&handle.namespace, &handle.name), tx));
        state.workload_watch_count += 1;
        Ok(event_stream(rx))
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<PodSummary>> {
        Ok(self
            .state()
            .pods
            .values()
            .filter(|pod| pod.namespace == namespace && pod.matches(selector))
            .cloned()
            .collect())
    }

    async fn watch_pods(&self, namespace: &str, selector: &Labels) -> Result<EventStream> {
        let mut state = self.state();
        if let Some(message) = &state.failures.pod_watch {
            return Err(Error::cluster(message.clone()));
        }
        let (tx, rx) = unbounded_channel();
        state.pod_watchers.push(PodWatcher {
            namespace: namespace.to_string(),
            selector: selector.clone(),
            tx,
        });
        state.pod_watch_count += 1;
        Ok(event_stream(rx))
    }

    async fn open_log_stream(&self, _namespace: &str, container: &ContainerKey) -> Result<LogStream> {
        let mut state = self.state();
        let reader = state
            .logs
            .get_mut(container)
            .and_then(|slot| slot.reader.take())
            .ok_or_else(|| Error::cluster(format!("no log stream available for {container}")))?;
        state.opened_logs.push(container.clone());
        Ok(Box::pin(reader))
    }
}
