//! ResourceStore backed by the Kubernetes API
//!
//! Status writes are JSON merge patches carrying `metadata.resourceVersion`,
//! so the API server rejects them with 409 when the object changed since
//! the reconciler read it.

use crate::resource::{to_record, ManagedResource};
use crds::ResourceStatus;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use reconciler::{ResourceKey, ResourceRecord, ResourceStore, StoreError, FINALIZER};
use serde_json::{json, Value};
use std::marker::PhantomData;
use tracing::debug;

/// Optional status fields that must be nulled explicitly to clear them in a merge patch
const CLEARABLE_STATUS_FIELDS: &[&str] = &[
    "id",
    "resourceMetadata",
    "eTag",
    "remoteState",
    "lastModifiedTime",
    "observedGeneration",
];

pub struct KubeStore<K> {
    client: Client,
    /// Namespace being watched; `None` means all namespaces
    namespace: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedResource> KubeStore<K> {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self {
            client,
            namespace,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn list_api(&self) -> Api<K> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Maps API errors onto the store's taxonomy
fn store_error(e: kube::Error) -> StoreError {
    match &e {
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message.clone()),
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message.clone()),
        _ => StoreError::Api(e.to_string()),
    }
}

fn version_of<K: ManagedResource>(obj: &K) -> String {
    obj.resource_version().unwrap_or_default()
}

/// Status as a merge patch body that also removes cleared fields
fn status_patch(expected_version: &str, status: &ResourceStatus) -> Result<Value, StoreError> {
    let mut body = serde_json::to_value(status)?;
    if let Value::Object(map) = &mut body {
        for field in CLEARABLE_STATUS_FIELDS {
            map.entry(field.to_string()).or_insert(Value::Null);
        }
    }
    Ok(json!({
        "metadata": { "resourceVersion": expected_version },
        "status": body,
    }))
}

#[async_trait::async_trait]
impl<K: ManagedResource> ResourceStore for KubeStore<K> {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceRecord>, StoreError> {
        match self.api(&key.namespace).get_opt(&key.name).await.map_err(store_error)? {
            Some(obj) => Ok(Some(to_record(&obj)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ResourceKey>, StoreError> {
        let objects = self
            .list_api()
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;
        Ok(objects.items.iter().map(crate::resource::resource_key).collect())
    }

    async fn ensure_finalizer(&self, record: &ResourceRecord) -> Result<String, StoreError> {
        let api = self.api(&record.key.namespace);
        let current = api.get(&record.key.name).await.map_err(store_error)?;
        let mut finalizers = current.finalizers().to_vec();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(version_of(&current));
        }
        finalizers.push(FINALIZER.to_string());

        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": version_of(&current),
            }
        });
        let updated = api
            .patch(&record.key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;
        debug!("Added finalizer to {}", record.key);
        Ok(version_of(&updated))
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        expected_version: &str,
        status: &ResourceStatus,
    ) -> Result<String, StoreError> {
        let patch = status_patch(expected_version, status)?;
        let updated = self
            .api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;
        Ok(version_of(&updated))
    }

    async fn release(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        let api = self.api(&record.key.namespace);
        let Some(current) = api.get_opt(&record.key.name).await.map_err(store_error)? else {
            return Ok(());
        };
        let finalizers: Vec<String> = current
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": version_of(&current),
            }
        });
        match api
            .patch(&record.key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // the object disappears as soon as its last finalizer is gone
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(store_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_patch_nulls_cleared_fields() {
        let patch = status_patch("17", &ResourceStatus::default()).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], json!("17"));
        assert_eq!(patch["status"]["id"], Value::Null);
        assert!(patch["status"].as_object().unwrap().contains_key("eTag"));
        assert_eq!(patch["status"]["phase"], json!("Pending"));
    }

    #[test]
    fn test_status_patch_keeps_set_fields() {
        let status = ResourceStatus {
            id: Some("E2QWRUHAPOMQZL".to_string()),
            observed_generation: Some(4),
            ..Default::default()
        };
        let patch = status_patch("18", &status).unwrap();
        assert_eq!(patch["status"]["id"], json!("E2QWRUHAPOMQZL"));
        assert_eq!(patch["status"]["observedGeneration"], json!(4));
    }
}
