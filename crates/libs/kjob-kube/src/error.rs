//! Kubernetes backend error types.

/// Errors raised while connecting to a cluster.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The kubeconfig file could not be loaded.
    #[error(transparent)]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// No usable cluster configuration was found in the environment.
    #[error(transparent)]
    InferConfig(#[from] kube::config::InferConfigError),

    /// The API client could not be built.
    #[error(transparent)]
    Client(#[from] kube::Error),
}
