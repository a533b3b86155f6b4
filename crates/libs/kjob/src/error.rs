//! Runner error types.

/// Boxed error coming from a cluster client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Runner errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Workload description or configuration is invalid.
    #[error(transparent)]
    Config(#[from] kjob_config::error::Error),

    /// A cluster API call failed.
    #[error("Cluster API error: {0}")]
    Cluster(#[source] BoxError),

    /// The workload could not be created.
    #[error("Failed to create workload {name}")]
    Submit {
        /// Workload name.
        name: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// A watch subscription could not be opened.
    #[error("Failed to watch {resource}")]
    WatchOpen {
        /// What was being watched.
        resource: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// The cluster reported the workload as failed.
    #[error("Workload {name} failed: {reason}")]
    WorkloadFailed {
        /// Workload name.
        name: String,
        /// Failure reason reported by the cluster.
        reason: String,
    },

    /// The completion watcher went away without reporting a result.
    #[error("Completion watcher exited without a result")]
    WatcherLost,

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// A spawned task panicked or was aborted.
    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Wrap any client error as a cluster API error.
    pub fn cluster<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Cluster(err.into())
    }

    /// Whether this error is the caller's own cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
