//! End-to-end reconcile behavior against the in-memory backend and store

use cloud_client::mock::MockLifecycle;
use cloud_client::{BackendAdapter, BackendCall, CloudError, CreateRequest, MockBackend};
use crds::{ConditionStatus, ReconcilePhase, Tag, CONDITION_READY, CONDITION_SYNCED};
use reconciler::wait::{self, WaitConfig};
use reconciler::{
    KindConfig, MemoryStore, ReconcileOutcome, ReconcileTask, Reconciler, ReconcilerConfig,
    ReferenceResource, ReferenceSet, ResourceKey, Scheduler, SchedulerConfig, TriggerReason,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn fast(mut kind: KindConfig) -> KindConfig {
    kind.poll_interval_millis = 5;
    kind.ready_requeue_millis = 10;
    kind.guard_wait_seconds = 2;
    kind
}

fn reconciler_with(backend: &MockBackend, store: &MemoryStore, kind: KindConfig, references: ReferenceSet) -> Reconciler {
    Reconciler::new(
        Arc::new(backend.clone()),
        Arc::new(store.clone()),
        kind,
        references,
        ReconcilerConfig {
            backoff_min_seconds: 1,
            backoff_max_seconds: 4,
            status_write_attempts: 3,
        },
    )
}

fn reconciler(backend: &MockBackend, store: &MemoryStore, kind: KindConfig) -> Reconciler {
    reconciler_with(backend, store, kind, ReferenceSet::new())
}

fn task(key: &ResourceKey) -> ReconcileTask {
    ReconcileTask::new(key.clone(), TriggerReason::SpecChanged)
}

fn cache_policy(default_ttl: i64) -> Value {
    json!({
        "cachePolicyConfig": {
            "name": "edge-default",
            "comment": "managed",
            "defaultTTL": default_ttl,
            "maxTTL": 86400,
            "minTTL": 1
        }
    })
}

fn distribution(comment: &str) -> Value {
    json!({
        "distributionConfig": {
            "callerReference": "site-ref",
            "comment": comment,
            "enabled": true,
            "origins": [{"id": "s3", "domainName": "assets.example.com"}]
        }
    })
}

fn user_tags(observed_tags: &[Tag]) -> Vec<Tag> {
    let mut tags: Vec<Tag> = observed_tags
        .iter()
        .filter(|t| !t.key.starts_with("converge.dev/"))
        .cloned()
        .collect();
    tags.sort_by(|a, b| a.key.cmp(&b.key));
    tags
}

#[tokio::test]
async fn test_create_adopts_resource_with_matching_token() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);

    // a previous pass created the resource but crashed before recording its id
    let token = store.record(&key).unwrap().idempotency_token();
    let existing = backend
        .create(&CreateRequest {
            config: cache_policy(600),
            tags: vec![],
            idempotency_token: token.clone(),
        })
        .await
        .unwrap();
    backend.clear_calls();

    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();

    assert_eq!(backend.resource_count(), 1);
    assert!(!backend.calls().iter().any(|c| matches!(c, BackendCall::Create { .. })));
    assert!(backend.calls().contains(&BackendCall::FindByToken { token }));
    assert_eq!(store.status(&key).unwrap().id, Some(existing.id));
}

#[tokio::test]
async fn test_create_is_idempotent_when_id_was_not_recorded() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());

    store.fail_next_status_update();
    assert!(r.reconcile(&task(&key)).await.is_err());
    assert!(store.status(&key).unwrap().id.is_none());

    r.reconcile(&task(&key)).await.unwrap();
    let creates = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::Create { .. }))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(backend.resource_count(), 1);
    assert!(store.status(&key).unwrap().id.is_some());
}

#[tokio::test]
async fn test_converged_resource_is_a_no_op() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![Tag::new("team", "edge")]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();

    let before = store.status(&key).unwrap();
    let writes = store.status_write_count();
    backend.clear_calls();

    let outcome = r
        .reconcile(&ReconcileTask::new(key.clone(), TriggerReason::Resync))
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(backend.mutations().is_empty());
    assert_eq!(store.status_write_count(), writes);
    let after = store.status(&key).unwrap();
    assert_eq!(after, before);
    assert_eq!(
        after.condition(CONDITION_SYNCED).unwrap().status,
        ConditionStatus::True
    );
}

#[tokio::test]
async fn test_server_defaults_do_not_cause_updates() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();

    let id = store.status(&key).unwrap().id.unwrap();
    backend.set_remote_field(&id, "cachePolicyConfig.etagSupport", json!(true));
    backend.set_remote_field(&id, "cachePolicyConfig.defaultTTL", json!(600.0));
    backend.clear_calls();

    r.reconcile(&task(&key)).await.unwrap();
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_guarded_delete_disables_and_confirms_before_deleting() {
    let backend = MockBackend::new("distributions")
        .with_lifecycle(MockLifecycle::deployed_after(1))
        .refuse_delete_when("distributionConfig.enabled", json!(true));
    let store = MemoryStore::new();
    let key = store.apply("default", "site", distribution("v1"), vec![]);
    let r = reconciler(&backend, &store, fast(KindConfig::distributions()));

    r.reconcile(&task(&key)).await.unwrap();
    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    backend.clear_calls();

    store.request_delete(&key);
    let outcome = r
        .reconcile(&ReconcileTask::new(key.clone(), TriggerReason::DeleteRequested))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);

    let calls = backend.calls();
    let update = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Update { paths, .. } if paths == &["distributionConfig.enabled".to_string()]))
        .unwrap();
    let delete = calls
        .iter()
        .position(|c| matches!(c, BackendCall::Delete { .. }))
        .unwrap();
    let confirm = calls[update + 1..delete]
        .iter()
        .filter(|c| matches!(c, BackendCall::Read { .. }))
        .count();
    assert!(update < delete);
    assert!(confirm >= 1, "guard must be confirmed by a read before delete: {:?}", calls);
    assert_eq!(calls.last(), Some(&BackendCall::Read { id }));

    assert!(store.record(&key).is_none());
    assert_eq!(backend.resource_count(), 0);
}

#[tokio::test]
async fn test_satisfied_guard_deletes_directly() {
    let backend = MockBackend::new("distributions");
    let store = MemoryStore::new();
    let mut config = distribution("v1");
    config["distributionConfig"]["enabled"] = json!(false);
    let key = store.apply("default", "site", config, vec![]);
    let mut kind = fast(KindConfig::distributions());
    kind.ready_states.clear();
    let r = reconciler(&backend, &store, kind);
    r.reconcile(&task(&key)).await.unwrap();
    backend.clear_calls();

    store.request_delete(&key);
    assert_eq!(r.reconcile(&task(&key)).await.unwrap(), ReconcileOutcome::Released);
    let mutations = backend.mutations();
    assert_eq!(mutations.len(), 1);
    assert!(matches!(mutations[0], BackendCall::Delete { .. }));
}

#[tokio::test]
async fn test_update_changes_only_the_edited_field() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    backend.clear_calls();

    store.apply("default", "edge", cache_policy(700), vec![]);
    r.reconcile(&task(&key)).await.unwrap();

    assert_eq!(
        backend.mutations(),
        vec![BackendCall::Update {
            id: id.clone(),
            paths: vec!["cachePolicyConfig.defaultTTL".to_string()],
        }]
    );
    let remote = backend.peek(&id).unwrap();
    assert_eq!(remote.config, cache_policy(700));

    let status = store.status(&key).unwrap();
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.e_tag.as_deref(), Some("E2"));
    assert_eq!(status.phase, ReconcilePhase::Synced);
}

#[tokio::test]
async fn test_cleared_field_is_cleared_remotely() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    backend.clear_calls();

    // the CRD serializes an unset comment as null
    let mut cleared = cache_policy(600);
    cleared["cachePolicyConfig"]["comment"] = Value::Null;
    store.apply("default", "edge", cleared, vec![]);
    r.reconcile(&task(&key)).await.unwrap();

    assert_eq!(
        backend.mutations(),
        vec![BackendCall::Update {
            id: id.clone(),
            paths: vec!["cachePolicyConfig.comment".to_string()],
        }]
    );
    assert_eq!(backend.peek(&id).unwrap().config["cachePolicyConfig"]["comment"], Value::Null);
    let status = store.status(&key).unwrap();
    assert_eq!(status.condition(CONDITION_SYNCED).unwrap().status, ConditionStatus::True);

    backend.clear_calls();
    r.reconcile(&task(&key)).await.unwrap();
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_delete_request_preempts_pending_update() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    backend.clear_calls();

    // a newer generation is pending when the delete arrives
    store.apply("default", "edge", cache_policy(700), vec![]);
    store.request_delete(&key);

    let outcome = r.reconcile(&task(&key)).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);
    assert_eq!(backend.mutations(), vec![BackendCall::Delete { id }]);
    assert!(store.record(&key).is_none());
}

#[tokio::test]
async fn test_unconfirmed_guard_times_out_without_deleting() {
    let backend = MockBackend::new("distributions")
        .with_lifecycle(MockLifecycle::deployed_after(2))
        .refuse_delete_when("distributionConfig.enabled", json!(true));
    let store = MemoryStore::new();
    let key = store.apply("default", "site", distribution("site"), vec![]);
    let mut kind = fast(KindConfig::distributions());
    kind.guard_wait_seconds = 0;
    let r = reconciler(&backend, &store, kind);

    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    backend.read(&id).await.unwrap();
    assert_eq!(backend.read(&id).await.unwrap().lifecycle_state.as_deref(), Some("Deployed"));
    backend.clear_calls();

    store.request_delete(&key);
    let outcome = r.reconcile(&task(&key)).await.unwrap();

    // the disable redeploys, so confirmation cannot succeed within a zero wait
    assert!(matches!(outcome, ReconcileOutcome::RequeueAfter(_)));
    assert_eq!(
        backend.mutations(),
        vec![BackendCall::Update {
            id: id.clone(),
            paths: vec!["distributionConfig.enabled".to_string()],
        }]
    );
    assert!(!backend.calls().iter().any(|c| matches!(c, BackendCall::Delete { .. })));

    let status = store.status(&key).unwrap();
    assert_eq!(status.phase, ReconcilePhase::Backoff);
    let synced = status.condition(CONDITION_SYNCED).unwrap();
    assert_eq!(synced.status, ConditionStatus::Unknown);
    assert_eq!(synced.reason.as_deref(), Some("Timeout"));
    assert!(store.record(&key).is_some());
    assert_eq!(backend.resource_count(), 1);
}

#[tokio::test]
async fn test_tags_converge_without_touching_system_tags() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let key = store.apply(
        "default",
        "edge",
        cache_policy(600),
        vec![Tag::new("a", "0"), Tag::new("b", "2")],
    );
    let r = reconciler(&backend, &store, KindConfig::cache_policies());
    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    let arn = format!("arn:mock:cache-policies/{}", id);
    backend.clear_calls();

    store.apply("default", "edge", cache_policy(600), vec![Tag::new("a", "1")]);
    r.reconcile(&task(&key)).await.unwrap();

    assert_eq!(
        backend.mutations(),
        vec![
            BackendCall::SetTags {
                arn: arn.clone(),
                keys: vec!["a".to_string()],
            },
            BackendCall::RemoveTags {
                arn,
                keys: vec!["b".to_string()],
            },
        ]
    );
    let remote = backend.peek(&id).unwrap();
    assert_eq!(user_tags(&remote.tags), vec![Tag::new("a", "1")]);
    assert!(remote.tags.contains(&Tag::new("converge.dev/managed-by", "converge-controller")));
}

#[tokio::test]
async fn test_permanent_failure_waits_for_spec_change() {
    let backend = MockBackend::new("cache-policies");
    backend.fail_next("create", CloudError::InvalidRequest("minTTL > maxTTL".to_string()));
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());

    assert_eq!(r.reconcile(&task(&key)).await.unwrap(), ReconcileOutcome::Done);
    let failed = store.status(&key).unwrap();
    assert_eq!(failed.phase, ReconcilePhase::Failed);
    let condition = failed.condition(CONDITION_SYNCED).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason.as_deref(), Some("InvalidRequest"));
    assert_eq!(failed.observed_generation, Some(1));

    // neither requeues nor resyncs touch the backend again
    backend.clear_calls();
    for reason in [TriggerReason::Requeue, TriggerReason::Resync] {
        let outcome = r
            .reconcile(&ReconcileTask::new(key.clone(), reason))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }
    assert!(backend.calls().is_empty());
    assert_eq!(store.status(&key).unwrap(), failed);

    store.apply("default", "edge", cache_policy(650), vec![]);
    r.reconcile(&task(&key)).await.unwrap();
    let status = store.status(&key).unwrap();
    assert_eq!(status.phase, ReconcilePhase::Synced);
    assert_eq!(backend.resource_count(), 1);
}

#[tokio::test]
async fn test_retry_delays_grow_and_cap() {
    let backend = MockBackend::new("cache-policies");
    for _ in 0..6 {
        backend.fail_next("create", CloudError::Unavailable("service unavailable".to_string()));
    }
    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());

    let mut delays = Vec::new();
    for _ in 0..6 {
        match r.reconcile(&task(&key)).await.unwrap() {
            ReconcileOutcome::RequeueAfter(delay) => delays.push(delay),
            other => panic!("expected a requeue, got {:?}", other),
        }
    }

    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(4)));
    assert_eq!(delays.last(), Some(&Duration::from_secs(4)));
    assert_eq!(store.status(&key).unwrap().attempts, 6);

    assert_eq!(r.reconcile(&task(&key)).await.unwrap(), ReconcileOutcome::Done);
    assert_eq!(store.status(&key).unwrap().attempts, 0);
}

#[tokio::test]
async fn test_references_are_substituted_before_diffing() {
    let backend = MockBackend::new("distributions");
    let store = MemoryStore::new();
    let mut config = distribution("v1");
    config["distributionConfig"]["origins"][0]["domainName"] = json!("$ref:origin-bucket.domainName");
    let key = store.apply("default", "site", config, vec![]);

    let mut references = ReferenceSet::new();
    references.insert(
        ReferenceResource::new("origin-bucket").with_field("domainName", json!("bucket.s3.example.com")),
    );
    let mut kind = fast(KindConfig::distributions());
    kind.ready_states.clear();
    let r = reconciler_with(&backend, &store, kind, references);

    r.reconcile(&task(&key)).await.unwrap();
    let id = store.status(&key).unwrap().id.unwrap();
    assert_eq!(
        backend.peek(&id).unwrap().field("distributionConfig.origins"),
        Some(&json!([{"id": "s3", "domainName": "bucket.s3.example.com"}]))
    );

    // resolved value equals the remote one, so the next pass is a no-op
    backend.clear_calls();
    r.reconcile(&task(&key)).await.unwrap();
    assert!(backend.mutations().is_empty());
}

#[tokio::test]
async fn test_unknown_reference_fails_permanently() {
    let backend = MockBackend::new("cache-policies");
    let store = MemoryStore::new();
    let mut config = cache_policy(600);
    config["cachePolicyConfig"]["comment"] = json!("$ref:missing.field");
    let key = store.apply("default", "edge", config, vec![]);
    let r = reconciler(&backend, &store, KindConfig::cache_policies());

    r.reconcile(&task(&key)).await.unwrap();
    let status = store.status(&key).unwrap();
    assert_eq!(status.phase, ReconcilePhase::Failed);
    assert_eq!(
        status.condition(CONDITION_SYNCED).unwrap().reason.as_deref(),
        Some("InvalidSpec")
    );
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_scheduler_drives_full_lifecycle() {
    let backend = MockBackend::new("distributions")
        .with_lifecycle(MockLifecycle::deployed_after(2))
        .refuse_delete_when("distributionConfig.enabled", json!(true));
    let store = MemoryStore::new();
    let r = Arc::new(reconciler(&backend, &store, fast(KindConfig::distributions())));
    let scheduler = Scheduler::new(
        Arc::clone(&r),
        SchedulerConfig {
            workers: 2,
            resync_interval: Duration::from_secs(1),
        },
    );
    let handle = scheduler.handle();
    let running = tokio::spawn(scheduler.run());
    let waits = WaitConfig::new(Duration::from_secs(5), Duration::from_millis(10));

    // create → wait until exists → assert synced
    let key = store.apply("default", "site", distribution("v1"), vec![Tag::new("env", "test")]);
    handle.enqueue(key.clone(), TriggerReason::SpecChanged);
    let record = wait::wait_for_condition(&store, &key, CONDITION_READY, ConditionStatus::True, waits)
        .await
        .unwrap();
    let id = record.status.id.clone().unwrap();
    wait::wait_until_exists(&backend, &id, waits).await.unwrap();
    assert_eq!(
        record.status.condition(CONDITION_SYNCED).unwrap().status,
        ConditionStatus::True
    );

    // patch → wait → assert updated
    store.apply("default", "site", distribution("v2"), vec![Tag::new("env", "test")]);
    handle.enqueue(key.clone(), TriggerReason::SpecChanged);
    let record = wait::wait_for_condition(&store, &key, CONDITION_READY, ConditionStatus::True, waits)
        .await
        .unwrap();
    assert_eq!(record.status.id.as_deref(), Some(id.as_str()));
    assert_eq!(
        backend.peek(&id).unwrap().field("distributionConfig.comment"),
        Some(&json!("v2"))
    );

    // delete → wait until deleted
    store.request_delete(&key);
    handle.enqueue(key.clone(), TriggerReason::DeleteRequested);
    wait::wait_until_released(&store, &key, waits).await.unwrap();
    wait::wait_until_deleted(&backend, &id, waits).await.unwrap();
    assert_eq!(backend.resource_count(), 0);

    handle.shutdown();
    running.await.unwrap();
}

#[tokio::test]
async fn test_waiters_time_out_distinctly() {
    let backend = MockBackend::new("cache-policies");
    let created = backend
        .create(&CreateRequest {
            config: cache_policy(600),
            tags: vec![],
            idempotency_token: "t".to_string(),
        })
        .await
        .unwrap();
    let waits = WaitConfig::new(Duration::from_millis(40), Duration::from_millis(10));

    let err = wait::wait_until_deleted(&backend, &created.id, waits)
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let err = wait::wait_until_exists(&backend, "M99999", waits).await.unwrap_err();
    assert!(err.is_timeout());

    let store = MemoryStore::new();
    let key = store.apply("default", "edge", cache_policy(600), vec![]);
    let err = wait::wait_for_condition(&store, &key, CONDITION_SYNCED, ConditionStatus::True, waits)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
