//! [`ClusterGateway`] over the Kubernetes API.

use async_trait::async_trait;
use futures::{StreamExt, future};
use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
use kjob::{
    cluster::{ClusterGateway, EventStream, LogStream, WatchEvent},
    error::Error,
    model::{ContainerKey, Labels, PodSummary, WorkloadHandle, WorkloadStatus, format_selector},
};
use kjob_config::{ClusterConfig, WorkloadSpec};
use kube::{
    Client, Config, ResourceExt,
    api::{Api, ListParams, LogParams, PostParams, WatchEvent as KubeWatchEvent, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info};

use crate::convert::{handle_from_job, job_from_spec, pod_summary, status_from_job};

type KjobResult<T> = kjob::prelude::Result<T>;

/// Kubernetes implementation of [`ClusterGateway`].
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the kubeconfig and context named in `config`.
    ///
    /// Without a kubeconfig path the usual discovery applies: `KUBECONFIG`,
    /// `~/.kube/config`, then the in-cluster service account.
    pub async fn connect(config: &ClusterConfig) -> crate::prelude::Result<Self> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };
        let kube_config = match (&config.kubeconfig, &config.context) {
            (Some(path), _) => {
                debug!("Loading kubeconfig {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options).await?,
            (None, None) => Config::infer().await?,
        };
        info!("Connecting to cluster at {}", kube_config.cluster_url);
        Ok(Self::new(Client::try_from(kube_config)?))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn watch_event<K>(event: kube::Result<KubeWatchEvent<K>>) -> Option<WatchEvent>
where
    K: kube::Resource,
{
    match event {
        Ok(KubeWatchEvent::Added(object)) => Some(WatchEvent::Added(object.name_any())),
        Ok(KubeWatchEvent::Modified(object)) => Some(WatchEvent::Modified(object.name_any())),
        Ok(KubeWatchEvent::Deleted(object)) => Some(WatchEvent::Deleted(object.name_any())),
        Ok(KubeWatchEvent::Bookmark(_)) => None,
        Ok(KubeWatchEvent::Error(err)) => Some(WatchEvent::Error(err.message)),
        Err(err) => Some(WatchEvent::Error(err.to_string())),
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn create_workload(&self, spec: &WorkloadSpec) -> KjobResult<WorkloadHandle> {
        let job = self
            .jobs(&spec.namespace)
            .create(&PostParams::default(), &job_from_spec(spec))
            .await
            .map_err(Error::cluster)?;
        handle_from_job(spec, &job)
            .ok_or_else(|| Error::cluster(format!("created job {spec} has no uid")))
    }

    async fn get_workload(&self, handle: &WorkloadHandle) -> KjobResult<WorkloadStatus> {
        let job = self
            .jobs(&handle.namespace)
            .get(&handle.name)
            .await
            .map_err(Error::cluster)?;
        Ok(status_from_job(&job))
    }

    async fn watch_workload(&self, handle: &WorkloadHandle) -> KjobResult<EventStream> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", handle.name));
        let events = self
            .jobs(&handle.namespace)
            .watch(&params, "0")
            .await
            .map_err(Error::cluster)?;
        Ok(events
            .filter_map(|event| future::ready(watch_event(event)))
            .boxed())
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> KjobResult<Vec<PodSummary>> {
        let params = ListParams::default().labels(&format_selector(selector));
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(Error::cluster)?;
        Ok(pods.items.iter().map(pod_summary).collect())
    }

    async fn watch_pods(&self, namespace: &str, selector: &Labels) -> KjobResult<EventStream> {
        let params = WatchParams::default().labels(&format_selector(selector));
        let events = self
            .pods(namespace)
            .watch(&params, "0")
            .await
            .map_err(Error::cluster)?;
        Ok(events
            .filter_map(|event| future::ready(watch_event(event)))
            .boxed())
    }

    async fn open_log_stream(&self, namespace: &str, container: &ContainerKey) -> KjobResult<LogStream> {
        let params = LogParams {
            container: Some(container.container.clone()),
            follow: true,
            ..Default::default()
        };
        let logs = self
            .pods(namespace)
            .log_stream(&container.pod, &params)
            .await
            .map_err(Error::cluster)?;
        Ok(Box::pin(logs.compat()))
    }
}
