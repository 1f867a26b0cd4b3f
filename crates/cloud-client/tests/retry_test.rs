//! RetryingBackend behavior against the in-memory mock

use cloud_client::{
    BackendAdapter, BackendCall, CloudError, CreateRequest, MockBackend, RetryPolicy, RetryingBackend,
};
use serde_json::json;
use std::time::Duration;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        call_timeout: Duration::from_millis(200),
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

#[tokio::test]
async fn test_throttling_is_retried_in_call() {
    let mock = MockBackend::new("cache-policies");
    let created = mock
        .create(&CreateRequest {
            config: json!({"name": "p"}),
            tags: vec![],
            idempotency_token: "t".to_string(),
        })
        .await
        .unwrap();
    mock.fail_next("read", CloudError::Throttled("slow down".to_string()));
    mock.fail_next("read", CloudError::Throttled("slow down".to_string()));

    let backend = RetryingBackend::new(mock.clone(), fast_policy());
    let observed = backend.read(&created.id).await.unwrap();
    assert_eq!(observed.id, created.id);

    let reads = mock
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::Read { .. }))
        .count();
    assert_eq!(reads, 3);
}

#[tokio::test]
async fn test_throttling_gives_up_after_max_retries() {
    let mock = MockBackend::new("cache-policies");
    for _ in 0..3 {
        mock.fail_next("read", CloudError::Throttled("slow down".to_string()));
    }
    let backend = RetryingBackend::new(mock, fast_policy());
    let err = backend.read("M00001").await.unwrap_err();
    assert!(matches!(err, CloudError::Throttled(_)));
}

#[tokio::test]
async fn test_other_errors_pass_through() {
    let mock = MockBackend::new("cache-policies");
    mock.fail_next("read", CloudError::Unavailable("down".to_string()));
    let backend = RetryingBackend::new(mock.clone(), fast_policy());
    let err = backend.read("M00001").await.unwrap_err();
    assert!(matches!(err, CloudError::Unavailable(_)));
    assert_eq!(mock.calls().len(), 1);

    let err = backend.read("M00001").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_slow_call_surfaces_timeout() {
    let mock = MockBackend::new("cache-policies");
    mock.set_latency(Duration::from_millis(500));
    let backend = RetryingBackend::new(mock, fast_policy());
    let err = backend.read("M00001").await.unwrap_err();
    assert!(matches!(err, CloudError::Timeout(_)));
    assert!(err.is_retryable());
}
