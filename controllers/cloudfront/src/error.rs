//! Controller-specific error types.
//!
//! Errors raised while wiring the controller together or running its
//! watchers. Per-resource failures never surface here; the reconciler
//! records them in status.

use cloud_client::CloudError;
use kube::Error as KubeError;
use reconciler::ReconcileError;
use thiserror::Error;

/// Errors that can occur in the CloudFront Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Remote service client error
    #[error("Backend error: {0}")]
    Backend(#[from] CloudError),

    /// Kind table or reference file could not be loaded
    #[error("Reconciler setup error: {0}")]
    Reconciler(#[from] ReconcileError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
