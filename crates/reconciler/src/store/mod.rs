//! Desired-state store interface
//!
//! The reconciler reads declarative records and writes their status through
//! [`ResourceStore`]. The controller binary backs it with the Kubernetes API;
//! tests use the in-memory [`MemoryStore`].

#[cfg(any(test, feature = "test-util"))]
mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;

use crate::error::StoreError;
use crds::{ResourceStatus, Tag};
use serde_json::Value;
use std::fmt;

/// Finalizer the controller holds on every record it has touched remotely
pub const FINALIZER: &str = "converge.dev/finalizer";

/// Stable namespace/name identity of a declarative resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// User-declared configuration payload plus tags
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesiredState {
    pub config: Value,
    pub tags: Vec<Tag>,
}

impl DesiredState {
    pub fn new(config: Value, tags: Vec<Tag>) -> Self {
        Self { config, tags }
    }
}

/// One declarative record as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub key: ResourceKey,
    /// Store-assigned unique id, stable for the record's lifetime
    pub uid: String,
    /// Bumped on every spec change
    pub generation: i64,
    /// Bumped on every write; status updates compare-and-swap against it
    pub resource_version: String,
    pub deletion_requested: bool,
    pub has_finalizer: bool,
    pub desired: DesiredState,
    pub status: ResourceStatus,
}

impl ResourceRecord {
    /// Deterministic idempotency token for remote creates
    pub fn idempotency_token(&self) -> String {
        format!("{}/{}/{}", self.key.namespace, self.key.name, self.uid)
    }

    /// Spec changed since the last completed or terminally failed pass
    pub fn generation_changed(&self) -> bool {
        self.status.observed_generation != Some(self.generation)
    }
}

/// Declarative store API consumed by the reconciler
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns `None` once the record is gone
    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<ResourceKey>, StoreError>;

    /// Adds [`FINALIZER`]; returns the new resource version
    async fn ensure_finalizer(&self, record: &ResourceRecord) -> Result<String, StoreError>;

    /// Replaces the status if the record is still at `expected_version`
    ///
    /// Returns the new resource version, or `StoreError::Conflict`.
    async fn update_status(
        &self,
        key: &ResourceKey,
        expected_version: &str,
        status: &ResourceStatus,
    ) -> Result<String, StoreError>;

    /// Removes [`FINALIZER`], letting a deleted record go away
    async fn release(&self, record: &ResourceRecord) -> Result<(), StoreError>;
}
