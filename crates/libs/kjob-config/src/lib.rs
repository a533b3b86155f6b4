//! Configuration management for kjob.
//!
//! Provides the runner configuration (cluster access, retry policy, log
//! copying) and the workload description that gets submitted to the cluster.
//!
//! # Usage
//!
//! ```rust
//! use kjob_config::{KjobConfig, KjobUserWorkload, WorkloadSpec};
//!
//! let config = KjobConfig::from_toml("[retry]\ninitial_interval_ms = 100").unwrap();
//! assert_eq!(config.retry.initial_interval_ms, 100);
//!
//! let workload = KjobUserWorkload::from_toml(
//!     r#"
//!     name = "build-42"
//!     [[containers]]
//!     name = "main"
//!     image = "alpine:3.20"
//!     command = ["echo", "hello"]
//!     "#,
//! )
//! .unwrap();
//! let spec = WorkloadSpec::from_user_workload(workload).unwrap();
//! assert_eq!(spec.namespace, "default");
//! ```

pub mod error;
pub mod kjob_config;
pub mod prelude;
pub mod workload;

pub use kjob_config::{ClusterConfig, GlobalConfig, KjobConfig, LogConfig, RetryConfig};
pub use workload::{ContainerTemplate, KjobUserWorkload, SecurityContextSpec, WorkloadSpec};
