//! Per-call timeout and in-call throttling retry
//!
//! `RetryingBackend` wraps any [`BackendAdapter`]. Each call is bounded by
//! `call_timeout`; throttled calls are retried a few times with a capped
//! exponential delay. Every other error is returned untouched so the
//! reconciler's own backoff decides what happens next.

use crate::backend_trait::BackendAdapter;
use crate::error::CloudError;
use crate::models::{CreateRequest, FieldDelta, ObservedState};
use crds::Tag;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout and retry settings for backend calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Deadline for a single attempt of a backend call
    pub call_timeout: Duration,
    /// Extra attempts after the first for throttled calls
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), doubling and capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Backend adapter decorator adding call deadlines and throttling retry
#[derive(Debug, Clone)]
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: BackendAdapter> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, CloudError>> + Send,
        T: Send,
    {
        let mut retry = 0;
        loop {
            let result = match tokio::time::timeout(self.policy.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(CloudError::Timeout(format!(
                    "{} {} exceeded {:?}",
                    self.inner.kind(),
                    operation,
                    self.policy.call_timeout
                ))),
            };

            match result {
                Err(CloudError::Throttled(message)) if retry < self.policy.max_retries => {
                    let delay = self.policy.delay_for(retry);
                    debug!(
                        "{} {} throttled ({}), retrying in {:?}",
                        self.inner.kind(),
                        operation,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    if matches!(e, CloudError::Timeout(_)) {
                        warn!("{} {} timed out: {}", self.inner.kind(), operation, e);
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

#[async_trait::async_trait]
impl<B: BackendAdapter> BackendAdapter for RetryingBackend<B> {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    async fn create(&self, request: &CreateRequest) -> Result<ObservedState, CloudError> {
        self.call("create", || self.inner.create(request)).await
    }

    async fn read(&self, id: &str) -> Result<ObservedState, CloudError> {
        self.call("read", || self.inner.read(id)).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ObservedState>, CloudError> {
        self.call("find_by_token", || self.inner.find_by_token(token)).await
    }

    async fn update(
        &self,
        id: &str,
        delta: &FieldDelta,
        e_tag: Option<&str>,
    ) -> Result<ObservedState, CloudError> {
        self.call("update", || self.inner.update(id, delta, e_tag)).await
    }

    async fn delete(&self, id: &str, e_tag: Option<&str>) -> Result<(), CloudError> {
        self.call("delete", || self.inner.delete(id, e_tag)).await
    }

    async fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, CloudError> {
        self.call("list_tags", || self.inner.list_tags(arn)).await
    }

    async fn set_tags(&self, arn: &str, tags: &[Tag]) -> Result<(), CloudError> {
        self.call("set_tags", || self.inner.set_tags(arn, tags)).await
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), CloudError> {
        self.call("remove_tags", || self.inner.remove_tags(arn, keys)).await
    }
}
