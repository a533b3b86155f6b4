//! Common types and utilities.

/// Kubernetes backend error type.
pub use crate::error::Error;

/// Kubernetes backend result type.
pub type Result<T> = core::result::Result<T, Error>;
