//! Error types for the controller.
//!
//! Wraps the failures of each layer with the context a reader of the
//! operator logs needs, and classifies them for requeue behavior.

use std::time::Duration;
use thiserror::Error;

use crate::client::{EtcdHealthError, HealthClientError};
use crate::collections::InventoryError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Listing or filtering member machines failed
    #[error("error filtering machines for etcd cluster: {0}")]
    Inventory(#[from] InventoryError),

    /// Building the cluster's health client failed (certificates or TLS setup)
    #[error(transparent)]
    HealthClient(#[from] HealthClientError),

    /// A member failed its health probe
    #[error(transparent)]
    HealthCheck(#[from] EtcdHealthError),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The pass was aborted because the operator is shutting down
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Inventory(e) => e.is_retryable(),
            // Certificates may not have been written yet; rebuild on the next pass.
            Error::HealthClient(HealthClientError::Cancelled) => false,
            Error::HealthClient(_) => true,
            Error::HealthCheck(e) => e.is_retryable(),
            Error::MissingField(_) | Error::Cancelled | Error::Serialization(_) => false,
        }
    }

    /// True if the error came from probing members, as opposed to
    /// reaching them at all.
    pub fn is_health_check_failure(&self) -> bool {
        matches!(self, Error::HealthCheck(_))
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        match self {
            // Members usually come up within seconds of each other.
            Error::HealthCheck(_) | Error::Inventory(_) if self.is_retryable() => {
                Duration::from_secs(10)
            }
            _ if self.is_retryable() => Duration::from_secs(30),
            _ => Duration::from_secs(300),
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
