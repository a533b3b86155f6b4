//! Run a batch workload to completion while streaming its logs.
//!
//! A run creates the workload on the cluster, copies the logs of every
//! container its pods run into a single shared sink and waits until the
//! cluster reports enough successful completions. Watch channels that close
//! are reopened with exponential backoff, without limit, until the caller
//! cancels.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kjob::{
//!     cluster::memory::MemoryCluster,
//!     orchestrator::{RunConfig, RunOrchestrator},
//! };
//! use kjob_config::{ContainerTemplate, WorkloadSpec};
//! use kjob_io::sink::SharedSink;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cluster = Arc::new(MemoryCluster::new());
//!     let orchestrator = RunOrchestrator::new(cluster, RunConfig::default());
//!     let spec = WorkloadSpec {
//!         namespace: String::from("default"),
//!         name: String::from("build-42"),
//!         completions: Some(1),
//!         parallelism: None,
//!         backoff_limit: 0,
//!         selector: Default::default(),
//!         containers: vec![ContainerTemplate {
//!             name: String::from("main"),
//!             image: String::from("alpine:3.20"),
//!             ..Default::default()
//!         }],
//!     };
//!
//!     // cancelled straight away: nothing runs on an in-memory cluster anyway
//!     let cancel = CancellationToken::new();
//!     cancel.cancel();
//!     let outcome = orchestrator
//!         .run(&spec, SharedSink::new(tokio::io::sink()), cancel)
//!         .await;
//!     assert!(outcome.is_cancelled());
//! }
//! ```

pub mod cluster;
pub mod completion;
pub mod diff;
pub mod error;
pub mod logs;
pub mod model;
pub mod orchestrator;
pub mod prelude;
pub mod reconciler;
pub mod retry;

pub use model::RunOutcome;
pub use orchestrator::{RunConfig, RunOrchestrator};
