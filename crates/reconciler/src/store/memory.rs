//! In-memory store for unit testing
//!
//! Mimics the Kubernetes API semantics the reconciler depends on: spec edits
//! bump the generation, every write bumps the resource version, status
//! writes are compare-and-swap, and a record with a finalizer survives a
//! delete request until the finalizer is released.

use super::{DesiredState, ResourceKey, ResourceRecord, ResourceStore, FINALIZER};
use crate::error::StoreError;
use crds::{ResourceStatus, Tag};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Mock ResourceStore for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<ResourceKey, ResourceRecord>>>,
    // Counter for resource versions and uids
    next_version: Arc<Mutex<u64>>,
    failing_status_updates: Arc<Mutex<u32>>,
    status_writes: Arc<Mutex<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    /// Creates or updates the desired state, as a user would
    pub fn apply(&self, namespace: &str, name: &str, config: Value, tags: Vec<Tag>) -> ResourceKey {
        let key = ResourceKey::new(namespace, name);
        let desired = DesiredState::new(config, tags);
        let version = self.bump();
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&key) {
            Some(record) => {
                if record.desired != desired {
                    record.desired = desired;
                    record.generation += 1;
                }
                record.resource_version = version;
            }
            None => {
                records.insert(
                    key.clone(),
                    ResourceRecord {
                        key: key.clone(),
                        uid: format!("uid-{}", version),
                        generation: 1,
                        resource_version: version,
                        deletion_requested: false,
                        has_finalizer: false,
                        desired,
                        status: ResourceStatus::default(),
                    },
                );
            }
        }
        key
    }

    /// Requests deletion; records without a finalizer vanish immediately
    pub fn request_delete(&self, key: &ResourceKey) {
        let version = self.bump();
        let mut records = self.records.lock().unwrap();
        let remove = match records.get_mut(key) {
            Some(record) => {
                record.deletion_requested = true;
                record.resource_version = version;
                !record.has_finalizer
            }
            None => false,
        };
        if remove {
            records.remove(key);
        }
    }

    /// Bumps the resource version without touching the spec
    pub fn touch(&self, key: &ResourceKey) {
        let version = self.bump();
        if let Some(record) = self.records.lock().unwrap().get_mut(key) {
            record.resource_version = version;
        }
    }

    pub fn record(&self, key: &ResourceKey) -> Option<ResourceRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn status(&self, key: &ResourceKey) -> Option<ResourceStatus> {
        self.record(key).map(|r| r.status)
    }

    /// Make the next status write fail with an API error
    pub fn fail_next_status_update(&self) {
        *self.failing_status_updates.lock().unwrap() += 1;
    }

    /// Number of successful status writes so far
    pub fn status_write_count(&self) -> u32 {
        *self.status_writes.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(self.record(key))
    }

    async fn list(&self) -> Result<Vec<ResourceKey>, StoreError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }

    async fn ensure_finalizer(&self, record: &ResourceRecord) -> Result<String, StoreError> {
        let version = self.bump();
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&record.key)
            .ok_or_else(|| StoreError::NotFound(record.key.to_string()))?;
        if stored.deletion_requested && !stored.has_finalizer {
            return Err(StoreError::Conflict(format!(
                "{} is being deleted; cannot add {}",
                record.key, FINALIZER
            )));
        }
        stored.has_finalizer = true;
        stored.resource_version = version.clone();
        Ok(version)
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        expected_version: &str,
        status: &ResourceStatus,
    ) -> Result<String, StoreError> {
        {
            let mut failing = self.failing_status_updates.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(StoreError::Api("injected status update failure".to_string()));
            }
        }

        let version = self.bump();
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.resource_version != expected_version {
            return Err(StoreError::Conflict(format!(
                "{} is at version {}, not {}",
                key, stored.resource_version, expected_version
            )));
        }
        stored.status = status.clone();
        stored.resource_version = version.clone();
        *self.status_writes.lock().unwrap() += 1;
        Ok(version)
    }

    async fn release(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let remove = match records.get_mut(&record.key) {
            Some(stored) => {
                stored.has_finalizer = false;
                stored.deletion_requested
            }
            None => false,
        };
        if remove {
            records.remove(&record.key);
        }
        Ok(())
    }
}
