//! Concurrent copy of container log streams into the shared sink.

use std::{collections::HashSet, sync::Arc};

use kjob_io::{
    copy::{copy_stream, is_stream_closed_error},
    sink::SharedSink,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{cluster::ClusterGateway, model::ContainerKey, prelude::*};

/// A running log copy for one container.
#[derive(Debug)]
pub struct StreamTask {
    key: ContainerKey,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamTask {
    /// Container served by this task.
    pub fn key(&self) -> &ContainerKey {
        &self.key
    }

    /// Stop the copy and close the underlying stream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task was cancelled or its stream ended.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Starts and tracks the log copies of a run.
///
/// At most one stream is ever started per (pod, container) pair.
pub struct LogStreamManager {
    gateway: Arc<dyn ClusterGateway>,
    sink: SharedSink,
    cancel: CancellationToken,
    buffer_size: usize,
    started: HashSet<ContainerKey>,
    tasks: Vec<StreamTask>,
}

impl LogStreamManager {
    /// Create a manager writing into `sink`.
    ///
    /// `cancel` is the caller's cancellation: every stream task is cancelled
    /// with it.
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        sink: SharedSink,
        cancel: CancellationToken,
        buffer_size: usize,
    ) -> Self {
        Self {
            gateway,
            sink,
            cancel,
            buffer_size,
            started: HashSet::new(),
            tasks: Vec::new(),
        }
    }

    /// Open the log stream of `key` and copy it into the sink in the background.
    ///
    /// Returns `None` when a stream was already started for this container.
    pub fn start_stream(&mut self, namespace: &str, key: ContainerKey) -> Option<&StreamTask> {
        if !self.started.insert(key.clone()) {
            debug!("Log stream for {key} already started");
            return None;
        }
        info!("Streaming logs of {key}");

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(stream_container_logs(
            self.gateway.clone(),
            namespace.to_string(),
            key.clone(),
            self.sink.clone(),
            self.buffer_size,
            cancel.clone(),
        ));
        self.tasks.push(StreamTask {
            key,
            cancel,
            handle,
        });
        self.tasks.last()
    }

    /// Tasks started so far and not drained yet.
    pub fn tasks(&self) -> &[StreamTask] {
        &self.tasks
    }

    /// Whether a stream was ever started for `key`.
    pub fn has_started(&self, key: &ContainerKey) -> bool {
        self.started.contains(key)
    }

    /// Whether any stream was started during the run.
    pub fn has_started_any(&self) -> bool {
        !self.started.is_empty()
    }

    /// Wait for every tracked stream to end. See [`drain_all`].
    pub async fn drain(&mut self) -> Result<()> {
        drain_all(&mut self.tasks, &self.cancel).await
    }
}

/// Wait until every task in `tasks` completed on its own, removing each one
/// as it ends. Tasks are awaited in no particular order.
///
/// Returns [`Error::Cancelled`] as soon as `cancel` fires, without waiting for
/// the remaining tasks. Dropping the future keeps the tasks not yet finished
/// in `tasks`.
pub async fn drain_all(tasks: &mut Vec<StreamTask>, cancel: &CancellationToken) -> Result<()> {
    debug!("Draining {} log streams", tasks.len());
    while let Some(task) = tasks.last_mut() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = &mut task.handle => {
                if let Err(err) = joined {
                    warn!("Log stream task for {} did not finish cleanly: {err}", task.key);
                }
            }
        }
        tasks.pop();
    }
    Ok(())
}

async fn stream_container_logs(
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    key: ContainerKey,
    sink: SharedSink,
    buffer_size: usize,
    cancel: CancellationToken,
) {
    // the task cancels its own token on exit, whatever the reason
    let _done = cancel.clone().drop_guard();

    let copy = async {
        let stream = gateway.open_log_stream(&namespace, &key).await?;
        Ok::<_, Error>(copy_stream(stream, &sink, buffer_size).await?)
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => debug!("Log stream for {key} cancelled"),
        result = copy => match result {
            Ok(copied) => debug!("Log stream for {key} ended after {copied} bytes"),
            Err(Error::IO(err)) if is_stream_closed_error(&err) => {
                debug!("Log stream for {key} closed: {err}");
            }
            Err(err) => warn!("Failed to complete copy of {key} logs: {err}"),
        },
    }
}
