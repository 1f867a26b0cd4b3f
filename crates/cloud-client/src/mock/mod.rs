//! Mock backend for unit testing
//!
//! Provides an in-memory implementation of [`BackendAdapter`] that behaves
//! like an eventually consistent cloud API:
//! - resources may start in a transitional lifecycle state and only become
//!   ready after a number of reads
//! - deletes may complete asynchronously
//! - modification is refused while a resource is transitional or when a
//!   configured delete guard is not satisfied
//! - failures can be injected per operation
//!
//! Every call is recorded in order so tests can assert on call sequences.

use crate::backend_trait::BackendAdapter;
use crate::error::CloudError;
use crate::models::{lookup, CreateRequest, FieldDelta, ObservedState};
use chrono::Utc;
use crds::Tag;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded call against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Create { token: String },
    Read { id: String },
    FindByToken { token: String },
    Update { id: String, paths: Vec<String> },
    Delete { id: String },
    ListTags { arn: String },
    SetTags { arn: String, keys: Vec<String> },
    RemoveTags { arn: String, keys: Vec<String> },
}

impl BackendCall {
    /// Operation name, as used by [`MockBackend::fail_next`]
    pub fn operation(&self) -> &'static str {
        match self {
            BackendCall::Create { .. } => "create",
            BackendCall::Read { .. } => "read",
            BackendCall::FindByToken { .. } => "find_by_token",
            BackendCall::Update { .. } => "update",
            BackendCall::Delete { .. } => "delete",
            BackendCall::ListTags { .. } => "list_tags",
            BackendCall::SetTags { .. } => "set_tags",
            BackendCall::RemoveTags { .. } => "remove_tags",
        }
    }

    /// True for calls that change remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            BackendCall::Read { .. } | BackendCall::FindByToken { .. } | BackendCall::ListTags { .. }
        )
    }
}

/// Simulated remote lifecycle for kinds with asynchronous provisioning
#[derive(Debug, Clone)]
pub struct MockLifecycle {
    pub transitional_state: String,
    pub ready_state: String,
    /// Reads after a create or update before the resource reports ready
    pub settle_reads: u32,
}

impl MockLifecycle {
    /// "InProgress" until `settle_reads` reads have happened, then "Deployed"
    pub fn deployed_after(settle_reads: u32) -> Self {
        Self {
            transitional_state: "InProgress".to_string(),
            ready_state: "Deployed".to_string(),
            settle_reads,
        }
    }
}

#[derive(Debug, Clone)]
struct MockResource {
    observed: ObservedState,
    token: String,
    version: u64,
    reads_until_ready: u32,
    /// Reads left before an accepted delete takes effect
    deleting: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct MockSettings {
    lifecycle: Option<MockLifecycle>,
    delete_settle_reads: u32,
    delete_guards: Vec<(String, Value)>,
    latency: Option<Duration>,
}

/// Mock BackendAdapter for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    kind: String,
    pub(crate) resources: Arc<Mutex<HashMap<String, MockResource>>>,
    pub(crate) tags: Arc<Mutex<HashMap<String, Vec<Tag>>>>,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failures: Arc<Mutex<VecDeque<(String, CloudError)>>>,
    settings: Arc<Mutex<MockSettings>>,
    // Counter for generating IDs
    next_id: Arc<Mutex<u64>>,
}

impl MockBackend {
    /// Create a new mock backend for one resource kind
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            resources: Arc::new(Mutex::new(HashMap::new())),
            tags: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            settings: Arc::new(Mutex::new(MockSettings::default())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Resources start transitional and settle after reads
    pub fn with_lifecycle(self, lifecycle: MockLifecycle) -> Self {
        self.settings.lock().unwrap().lifecycle = Some(lifecycle);
        self
    }

    /// Accepted deletes take effect only after this many reads
    pub fn with_delete_settle_reads(self, reads: u32) -> Self {
        self.settings.lock().unwrap().delete_settle_reads = reads;
        self
    }

    /// Refuse deletes with a conflict while `path` equals `value`
    pub fn refuse_delete_when(self, path: impl Into<String>, value: Value) -> Self {
        self.settings
            .lock()
            .unwrap()
            .delete_guards
            .push((path.into(), value));
        self
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.settings.lock().unwrap().latency = Some(latency);
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &str, error: CloudError) {
        self.failures
            .lock()
            .unwrap()
            .push_back((operation.to_string(), error));
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that changed remote state, in order
    pub fn mutations(&self) -> Vec<BackendCall> {
        self.calls().into_iter().filter(BackendCall::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of live resources, including ones whose delete is pending
    pub fn resource_count(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    /// Current remote state without recording a call or advancing lifecycles
    pub fn peek(&self, id: &str) -> Option<ObservedState> {
        let resources = self.resources.lock().unwrap();
        let resource = resources.get(id)?;
        let mut observed = resource.observed.clone();
        if let Some(arn) = &observed.arn {
            observed.tags = self.tags.lock().unwrap().get(arn).cloned().unwrap_or_default();
        }
        Some(observed)
    }

    /// Changes a field out of band, as if edited directly on the service
    pub fn set_remote_field(&self, id: &str, path: &str, value: Value) {
        if let Some(resource) = self.resources.lock().unwrap().get_mut(id) {
            crate::models::assign(&mut resource.observed.config, path, value);
            resource.version += 1;
            resource.observed.e_tag = Some(format!("E{}", resource.version));
        }
    }

    /// Removes a resource out of band
    pub fn remove_remote(&self, id: &str) {
        self.resources.lock().unwrap().remove(id);
    }

    /// Generate next ID
    fn next_id(&self) -> String {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        format!("M{:05}", current)
    }

    async fn begin(&self, call: BackendCall) -> Result<(), CloudError> {
        let operation = call.operation();
        self.calls.lock().unwrap().push(call);

        let latency = self.settings.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = self.failures.lock().unwrap();
        if let Some(index) = failures.iter().position(|(op, _)| op == operation) {
            if let Some((_, error)) = failures.remove(index) {
                return Err(error);
            }
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> CloudError {
        CloudError::NotFound(format!("{} {} not found", self.kind, id))
    }

    fn arn_known(&self, arn: &str) -> bool {
        self.resources
            .lock()
            .unwrap()
            .values()
            .any(|r| r.observed.arn.as_deref() == Some(arn))
    }
}

#[async_trait::async_trait]
impl BackendAdapter for MockBackend {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn create(&self, request: &CreateRequest) -> Result<ObservedState, CloudError> {
        self.begin(BackendCall::Create {
            token: request.idempotency_token.clone(),
        })
        .await?;

        if !request.config.is_object() {
            return Err(CloudError::InvalidRequest(
                "config must be a JSON object".to_string(),
            ));
        }

        let lifecycle = self.settings.lock().unwrap().lifecycle.clone();
        let id = self.next_id();
        let arn = format!("arn:mock:{}/{}", self.kind, id);
        let observed = ObservedState {
            id: id.clone(),
            arn: Some(arn.clone()),
            e_tag: Some("E1".to_string()),
            lifecycle_state: lifecycle.as_ref().map(|l| {
                if l.settle_reads == 0 {
                    l.ready_state.clone()
                } else {
                    l.transitional_state.clone()
                }
            }),
            config: request.config.clone(),
            tags: Vec::new(),
            last_modified_time: Some(Utc::now()),
            fetched_at: Utc::now(),
        };

        self.resources.lock().unwrap().insert(
            id,
            MockResource {
                observed: observed.clone(),
                token: request.idempotency_token.clone(),
                version: 1,
                reads_until_ready: lifecycle.map(|l| l.settle_reads).unwrap_or(0),
                deleting: None,
            },
        );
        self.tags.lock().unwrap().insert(arn, request.tags.clone());

        Ok(ObservedState {
            tags: request.tags.clone(),
            ..observed
        })
    }

    async fn read(&self, id: &str) -> Result<ObservedState, CloudError> {
        self.begin(BackendCall::Read { id: id.to_string() }).await?;

        let ready_state = self
            .settings
            .lock()
            .unwrap()
            .lifecycle
            .as_ref()
            .map(|l| l.ready_state.clone());

        let mut resources = self.resources.lock().unwrap();
        let Some(resource) = resources.get_mut(id) else {
            return Err(self.not_found(id));
        };

        if let Some(remaining) = resource.deleting {
            if remaining == 0 {
                resources.remove(id);
                return Err(self.not_found(id));
            }
            resource.deleting = Some(remaining - 1);
        }

        if resource.reads_until_ready > 0 {
            resource.reads_until_ready -= 1;
            if resource.reads_until_ready == 0 {
                resource.observed.lifecycle_state = ready_state;
            }
        }

        Ok(ObservedState {
            fetched_at: Utc::now(),
            ..resource.observed.clone()
        })
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ObservedState>, CloudError> {
        self.begin(BackendCall::FindByToken {
            token: token.to_string(),
        })
        .await?;

        Ok(self
            .resources
            .lock()
            .unwrap()
            .values()
            .find(|r| r.token == token && r.deleting.is_none())
            .map(|r| r.observed.clone()))
    }

    async fn update(
        &self,
        id: &str,
        delta: &FieldDelta,
        e_tag: Option<&str>,
    ) -> Result<ObservedState, CloudError> {
        self.begin(BackendCall::Update {
            id: id.to_string(),
            paths: delta.paths().into_iter().map(str::to_string).collect(),
        })
        .await?;

        let lifecycle = self.settings.lock().unwrap().lifecycle.clone();
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(id)
            .filter(|r| r.deleting.is_none())
            .ok_or_else(|| self.not_found(id))?;

        if resource.reads_until_ready > 0 {
            return Err(CloudError::Conflict(format!(
                "{} {} is not in a modifiable state",
                self.kind, id
            )));
        }
        if let Some(expected) = e_tag {
            if resource.observed.e_tag.as_deref() != Some(expected) {
                return Err(CloudError::Conflict(format!(
                    "precondition failed: eTag {} is stale",
                    expected
                )));
            }
        }

        delta.apply_to(&mut resource.observed.config);
        resource.version += 1;
        resource.observed.e_tag = Some(format!("E{}", resource.version));
        resource.observed.last_modified_time = Some(Utc::now());
        if let Some(lifecycle) = lifecycle {
            if lifecycle.settle_reads > 0 {
                resource.reads_until_ready = lifecycle.settle_reads;
                resource.observed.lifecycle_state = Some(lifecycle.transitional_state);
            }
        }

        Ok(resource.observed.clone())
    }

    async fn delete(&self, id: &str, e_tag: Option<&str>) -> Result<(), CloudError> {
        self.begin(BackendCall::Delete { id: id.to_string() }).await?;

        let settings = self.settings.lock().unwrap().clone();
        let mut resources = self.resources.lock().unwrap();
        let Some(resource) = resources.get_mut(id) else {
            return Err(self.not_found(id));
        };
        if resource.deleting.is_some() {
            return Ok(());
        }
        if resource.reads_until_ready > 0 {
            return Err(CloudError::Conflict(format!(
                "{} {} is not in a modifiable state",
                self.kind, id
            )));
        }
        if let Some(expected) = e_tag {
            if resource.observed.e_tag.as_deref() != Some(expected) {
                return Err(CloudError::Conflict(format!(
                    "precondition failed: eTag {} is stale",
                    expected
                )));
            }
        }
        for (path, value) in &settings.delete_guards {
            if lookup(&resource.observed.config, path) == Some(value) {
                return Err(CloudError::Conflict(format!(
                    "{} {} cannot be deleted while {} is {}",
                    self.kind, id, path, value
                )));
            }
        }

        if settings.delete_settle_reads == 0 {
            resources.remove(id);
        } else {
            resource.deleting = Some(settings.delete_settle_reads);
        }
        Ok(())
    }

    async fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, CloudError> {
        self.begin(BackendCall::ListTags {
            arn: arn.to_string(),
        })
        .await?;

        if !self.arn_known(arn) {
            return Err(self.not_found(arn));
        }
        Ok(self.tags.lock().unwrap().get(arn).cloned().unwrap_or_default())
    }

    async fn set_tags(&self, arn: &str, tags: &[Tag]) -> Result<(), CloudError> {
        self.begin(BackendCall::SetTags {
            arn: arn.to_string(),
            keys: tags.iter().map(|t| t.key.clone()).collect(),
        })
        .await?;

        if !self.arn_known(arn) {
            return Err(self.not_found(arn));
        }
        let mut all_tags = self.tags.lock().unwrap();
        let existing = all_tags.entry(arn.to_string()).or_default();
        for tag in tags {
            match existing.iter_mut().find(|t| t.key == tag.key) {
                Some(current) => current.value = tag.value.clone(),
                None => existing.push(tag.clone()),
            }
        }
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), CloudError> {
        self.begin(BackendCall::RemoveTags {
            arn: arn.to_string(),
            keys: keys.to_vec(),
        })
        .await?;

        if !self.arn_known(arn) {
            return Err(self.not_found(arn));
        }
        if let Some(existing) = self.tags.lock().unwrap().get_mut(arn) {
            existing.retain(|t| !keys.contains(&t.key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(token: &str) -> CreateRequest {
        CreateRequest {
            config: json!({"comment": "c", "enabled": true}),
            tags: vec![Tag::new("team", "edge")],
            idempotency_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_settles_after_reads() {
        let mock = MockBackend::new("distributions").with_lifecycle(MockLifecycle::deployed_after(2));
        let created = mock.create(&request("t1")).await.unwrap();
        assert_eq!(created.lifecycle_state.as_deref(), Some("InProgress"));

        let first = mock.read(&created.id).await.unwrap();
        assert_eq!(first.lifecycle_state.as_deref(), Some("InProgress"));
        let second = mock.read(&created.id).await.unwrap();
        assert_eq!(second.lifecycle_state.as_deref(), Some("Deployed"));
    }

    #[tokio::test]
    async fn test_update_refused_while_transitional() {
        let mock = MockBackend::new("distributions").with_lifecycle(MockLifecycle::deployed_after(1));
        let created = mock.create(&request("t1")).await.unwrap();
        let delta = FieldDelta::new().set("enabled", json!(false));

        let err = mock.update(&created.id, &delta, None).await.unwrap_err();
        assert!(err.is_retryable());

        mock.read(&created.id).await.unwrap();
        let updated = mock.update(&created.id, &delta, Some("E1")).await.unwrap();
        assert_eq!(updated.field("enabled"), Some(&json!(false)));
        assert_eq!(updated.e_tag.as_deref(), Some("E2"));
        assert_eq!(updated.lifecycle_state.as_deref(), Some("InProgress"));
    }

    #[tokio::test]
    async fn test_stale_e_tag_is_conflict() {
        let mock = MockBackend::new("cache-policies");
        let created = mock.create(&request("t1")).await.unwrap();
        let delta = FieldDelta::new().set("comment", json!("x"));
        let err = mock.update(&created.id, &delta, Some("E0")).await.unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_guard_and_async_delete() {
        let mock = MockBackend::new("distributions")
            .refuse_delete_when("enabled", json!(true))
            .with_delete_settle_reads(1);
        let created = mock.create(&request("t1")).await.unwrap();

        assert!(mock.delete(&created.id, None).await.is_err());

        let delta = FieldDelta::new().set("enabled", json!(false));
        mock.update(&created.id, &delta, None).await.unwrap();
        mock.delete(&created.id, None).await.unwrap();

        // still visible for one read, then gone
        assert!(mock.read(&created.id).await.is_ok());
        assert!(mock.read(&created.id).await.unwrap_err().is_not_found());
        assert_eq!(mock.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_find_by_token_and_tags() {
        let mock = MockBackend::new("cache-policies");
        let created = mock.create(&request("token-a")).await.unwrap();
        let arn = created.arn.clone().unwrap();

        let found = mock.find_by_token("token-a").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(mock.find_by_token("token-b").await.unwrap().is_none());

        mock.set_tags(&arn, &[Tag::new("team", "core"), Tag::new("a", "1")])
            .await
            .unwrap();
        mock.remove_tags(&arn, &["a".to_string()]).await.unwrap();
        assert_eq!(mock.list_tags(&arn).await.unwrap(), vec![Tag::new("team", "core")]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let mock = MockBackend::new("cache-policies");
        mock.fail_next("create", CloudError::Unavailable("down".to_string()));
        assert!(mock.create(&request("t")).await.is_err());
        assert!(mock.create(&request("t")).await.is_ok());
        assert_eq!(mock.mutations().len(), 2);
        assert_eq!(mock.resource_count(), 1);
    }
}
