//! Convergence waiters
//!
//! Poll helpers for callers that need to block until the remote service or a
//! record's status reaches some state. Running out of time is reported as
//! [`WaitError::Timeout`], never as absence or success.

use crate::error::StoreError;
use crate::store::{ResourceKey, ResourceRecord, ResourceStore};
use cloud_client::{BackendAdapter, CloudError, ObservedState};
use crds::ConditionStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// How long and how often to poll
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(15),
        }
    }
}

impl WaitConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    /// The condition did not hold before the deadline
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("Backend error: {0}")]
    Backend(#[from] CloudError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Polls `check` until it yields a value or the deadline passes
async fn poll<T, F, Fut>(what: String, config: WaitConfig, mut check: F) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, WaitError>>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        let waited = started.elapsed();
        if waited >= config.timeout {
            return Err(WaitError::Timeout { what, waited });
        }
        debug!("Still waiting for {} ({:?} elapsed)", what, waited);
        tokio::time::sleep(config.interval.min(config.timeout - waited)).await;
    }
}

/// Waits until the remote resource can be read
pub async fn wait_until_exists(
    backend: &dyn BackendAdapter,
    id: &str,
    config: WaitConfig,
) -> Result<ObservedState, WaitError> {
    let what = format!("{} {} to exist", backend.kind(), id);
    poll(what, config, || async move {
        match backend.read(id).await {
            Ok(observed) => Ok(Some(observed)),
            Err(e) if e.is_not_found() || e.is_retryable() => Ok(None),
            Err(e) => Err(e.into()),
        }
    })
    .await
}

/// Waits until a read of the remote resource returns NotFound
pub async fn wait_until_deleted(
    backend: &dyn BackendAdapter,
    id: &str,
    config: WaitConfig,
) -> Result<(), WaitError> {
    let what = format!("{} {} to be deleted", backend.kind(), id);
    poll(what, config, || async move {
        match backend.read(id).await {
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(Some(())),
            Err(e) if e.is_retryable() => Ok(None),
            Err(e) => Err(e.into()),
        }
    })
    .await
}

/// Waits until the record's condition has `status` for its current generation
pub async fn wait_for_condition(
    store: &dyn ResourceStore,
    key: &ResourceKey,
    condition_type: &str,
    status: ConditionStatus,
    config: WaitConfig,
) -> Result<ResourceRecord, WaitError> {
    let what = format!("{} to report {}={:?}", key, condition_type, status);
    poll(what, config, || async move {
        let Some(record) = store.get(key).await? else {
            return Ok(None);
        };
        let matched = record
            .status
            .condition(condition_type)
            .is_some_and(|c| c.status == status);
        let current = record.status.observed_generation == Some(record.generation);
        Ok((matched && current).then_some(record))
    })
    .await
}

/// Waits until the record is gone from the store
pub async fn wait_until_released(
    store: &dyn ResourceStore,
    key: &ResourceKey,
    config: WaitConfig,
) -> Result<(), WaitError> {
    let what = format!("{} to be released", key);
    poll(what, config, || async move {
        Ok(store.get(key).await?.is_none().then_some(()))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_reports_timeout_distinctly() {
        let config = WaitConfig::new(Duration::from_millis(30), Duration::from_millis(10));
        let err = poll::<(), _, _>("nothing".to_string(), config, || async { Ok(None) })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("nothing"));
    }

    #[tokio::test]
    async fn test_poll_returns_first_value() {
        let config = WaitConfig::new(Duration::from_secs(1), Duration::from_millis(1));
        let mut calls = 0;
        let value = poll("third call".to_string(), config, || {
            calls += 1;
            let done = calls >= 3;
            async move { Ok(done.then_some(calls)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }
}
