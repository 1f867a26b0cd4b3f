//! Mapping between CRD objects and reconciler records
//!
//! Every managed CRD has a spec of `{<kind>Config, tags}` and the shared
//! status block, so one generic conversion serves them all.

use crds::{CachePolicy, Distribution, ResourceStatus, Tag};
use kube::{Resource, ResourceExt};
use reconciler::{DesiredState, ResourceKey, ResourceRecord, StoreError, FINALIZER};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// A CRD whose spec the reconciler drives onto the remote service
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Backend collection name, also the kind table key
    const BACKEND_KIND: &'static str;

    type Spec: Serialize;

    fn spec(&self) -> &Self::Spec;

    fn resource_status(&self) -> Option<&ResourceStatus>;
}

impl ManagedResource for CachePolicy {
    const BACKEND_KIND: &'static str = "cache-policies";
    type Spec = crds::CachePolicySpec;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }
}

impl ManagedResource for Distribution {
    const BACKEND_KIND: &'static str = "distributions";
    type Spec = crds::DistributionSpec;

    fn spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn resource_status(&self) -> Option<&ResourceStatus> {
        self.status.as_ref()
    }
}

pub fn resource_key<K: ManagedResource>(obj: &K) -> ResourceKey {
    ResourceKey::new(obj.namespace().unwrap_or_else(|| "default".to_string()), obj.name_any())
}

/// Splits the spec into the config payload and the tag list
pub fn desired_state<K: ManagedResource>(obj: &K) -> Result<DesiredState, StoreError> {
    let mut spec = serde_json::to_value(obj.spec())?;
    let Value::Object(map) = &mut spec else {
        return Err(StoreError::Invalid(format!("{} spec is not an object", obj.name_any())));
    };
    let tags: Vec<Tag> = match map.remove("tags") {
        Some(tags) => serde_json::from_value(tags)?,
        None => Vec::new(),
    };
    Ok(DesiredState::new(spec, tags))
}

pub fn to_record<K: ManagedResource>(obj: &K) -> Result<ResourceRecord, StoreError> {
    let meta = obj.meta();
    Ok(ResourceRecord {
        key: resource_key(obj),
        uid: meta.uid.clone().unwrap_or_default(),
        generation: meta.generation.unwrap_or(0),
        resource_version: meta.resource_version.clone().unwrap_or_default(),
        deletion_requested: meta.deletion_timestamp.is_some(),
        has_finalizer: obj.finalizers().iter().any(|f| f == FINALIZER),
        desired: desired_state(obj)?,
        status: obj.resource_status().cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{CachePolicyConfig, CachePolicySpec};
    use serde_json::json;

    fn policy() -> CachePolicy {
        let mut policy = CachePolicy::new(
            "edge",
            CachePolicySpec {
                cache_policy_config: CachePolicyConfig {
                    name: "edge-default".to_string(),
                    default_ttl: Some(600),
                    min_ttl: 1,
                    ..Default::default()
                },
                tags: vec![Tag::new("team", "edge")],
            },
        );
        policy.metadata.namespace = Some("web".to_string());
        policy.metadata.uid = Some("abc".to_string());
        policy.metadata.generation = Some(3);
        policy.metadata.resource_version = Some("42".to_string());
        policy
    }

    #[test]
    fn test_desired_state_splits_tags() {
        let desired = desired_state(&policy()).unwrap();
        assert_eq!(desired.tags, vec![Tag::new("team", "edge")]);
        assert_eq!(desired.config["cachePolicyConfig"]["defaultTTL"], json!(600));
        assert_eq!(desired.config["cachePolicyConfig"]["minTTL"], json!(1));
        assert!(desired.config.get("tags").is_none());
    }

    #[test]
    fn test_cleared_fields_stay_in_desired_state() {
        let mut policy = policy();
        policy.spec.cache_policy_config.comment = Some("managed".to_string());
        let before = desired_state(&policy).unwrap();
        assert_eq!(before.config["cachePolicyConfig"]["comment"], json!("managed"));

        policy.spec.cache_policy_config.comment = None;
        policy.spec.cache_policy_config.default_ttl = None;
        let after = desired_state(&policy).unwrap();
        let config = after.config["cachePolicyConfig"].as_object().unwrap();
        assert_eq!(config.get("comment"), Some(&Value::Null));
        assert_eq!(config.get("defaultTTL"), Some(&Value::Null));
    }

    #[test]
    fn test_record_from_object() {
        let mut policy = policy();
        policy.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let record = to_record(&policy).unwrap();
        assert_eq!(record.key, ResourceKey::new("web", "edge"));
        assert_eq!(record.idempotency_token(), "web/edge/abc");
        assert_eq!(record.generation, 3);
        assert_eq!(record.resource_version, "42");
        assert!(record.has_finalizer);
        assert!(!record.deletion_requested);
    }
}
