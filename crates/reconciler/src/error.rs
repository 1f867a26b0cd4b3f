//! Reconciler error types.
//!
//! Every failure a reconcile pass can hit is folded into [`ReconcileError`],
//! which classifies itself into the four outcome classes the state machine
//! acts on.

use cloud_client::{CloudError, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a [`crate::ResourceStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Resource version changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store API error
    #[error("Store API error: {0}")]
    Api(String),

    /// Record could not be converted to or from its stored form
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// How the state machine reacts to a failed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Back off and retry
    Retryable,
    /// Stop until the spec changes
    Permanent,
    /// A pre-delete guard is not satisfied yet; re-attempt the guard
    GuardViolation,
    /// A call or confirmation exceeded its deadline; retry
    Timeout,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Permanent)
    }
}

/// Errors that can occur during a reconcile pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Remote service error
    #[error("Backend error: {0}")]
    Backend(#[from] CloudError),

    /// Desired-state store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote resource is in a transitional state and cannot be modified yet
    #[error("Not ready for modification: {0}")]
    NotReady(String),

    /// Pre-delete guard not yet satisfied
    #[error("Delete guard not satisfied: {0}")]
    GuardViolation(String),

    /// Waited too long for the remote service
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A known remote id was not found, possibly a read-after-write miss
    #[error("Remote resource not visible yet: {0}")]
    ReadMiss(String),

    /// Persisted id no longer resolves to a remote resource
    #[error("Stale remote id: {0}")]
    StaleId(String),

    /// Desired state cannot be applied as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Resource kind has no configuration
    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    /// A failed pass was counted but its status could not be recorded
    #[error("Status write failed after a counted failure: {source}")]
    StatusWrite {
        #[source]
        source: Box<ReconcileError>,
        /// Backoff already computed for the counted failure
        retry_after: Duration,
    },
}

impl ReconcileError {
    /// Classifies the error for the state machine
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::StatusWrite { source, .. } => source.kind(),
            ReconcileError::Backend(CloudError::Timeout(_)) => ErrorKind::Timeout,
            ReconcileError::Backend(e) => match e.class() {
                ErrorClass::Retryable => ErrorKind::Retryable,
                ErrorClass::Permanent => ErrorKind::Permanent,
            },
            ReconcileError::Store(StoreError::Invalid(_)) => ErrorKind::Permanent,
            ReconcileError::Store(_) | ReconcileError::NotReady(_) | ReconcileError::ReadMiss(_) => {
                ErrorKind::Retryable
            }
            ReconcileError::GuardViolation(_) => ErrorKind::GuardViolation,
            ReconcileError::Timeout(_) => ErrorKind::Timeout,
            ReconcileError::StaleId(_)
            | ReconcileError::InvalidSpec(_)
            | ReconcileError::UnknownKind(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }

    /// Retry delay when the failure has already been counted against the backoff
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ReconcileError::StatusWrite { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Short machine-readable reason used in status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::StatusWrite { source, .. } => source.reason(),
            ReconcileError::Backend(e) => e.reason(),
            ReconcileError::Store(StoreError::Conflict(_)) => "StoreConflict",
            ReconcileError::Store(_) => "StoreError",
            ReconcileError::NotReady(_) => "NotReadyForModification",
            ReconcileError::GuardViolation(_) => "DeleteGuardPending",
            ReconcileError::Timeout(_) => "Timeout",
            ReconcileError::ReadMiss(_) => "ReadAfterWriteMiss",
            ReconcileError::StaleId(_) => "RemoteResourceMissing",
            ReconcileError::InvalidSpec(_) => "InvalidSpec",
            ReconcileError::UnknownKind(_) => "UnknownKind",
        }
    }
}
