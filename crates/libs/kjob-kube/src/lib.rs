//! Kubernetes backend for kjob.
//!
//! [`KubeGateway`] implements [`kjob::cluster::ClusterGateway`] on top of
//! `batch/v1` Jobs and core `v1` Pods.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kjob::{RunConfig, RunOrchestrator};
//! use kjob_config::KjobConfig;
//! use kjob_kube::KubeGateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KjobConfig::default();
//! let gateway = KubeGateway::connect(&config.cluster).await?;
//! let orchestrator = RunOrchestrator::new(Arc::new(gateway), RunConfig::from(&config));
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod error;
pub mod gateway;
pub mod prelude;

pub use gateway::KubeGateway;
