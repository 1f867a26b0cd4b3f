//! BackendAdapter trait
//!
//! Abstracts one resource kind's CRUD and tagging API on the remote service.
//! The concrete HTTP client implements it, and tests use the in-memory mock.

use crate::error::CloudError;
use crate::models::{CreateRequest, FieldDelta, ObservedState};
use crds::Tag;
use std::sync::Arc;

/// Per-resource-kind operations against the remote service
///
/// Every failure must be classified through [`CloudError::class`]; the
/// reconciler's backoff depends on that classification being accurate.
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Resource kind this adapter serves (e.g. "cache-policies")
    fn kind(&self) -> &str;

    async fn create(&self, request: &CreateRequest) -> Result<ObservedState, CloudError>;

    /// Reads by id; `CloudError::NotFound` when the resource does not exist
    async fn read(&self, id: &str) -> Result<ObservedState, CloudError>;

    /// Finds a resource previously created with this idempotency token
    async fn find_by_token(&self, token: &str) -> Result<Option<ObservedState>, CloudError>;

    async fn update(
        &self,
        id: &str,
        delta: &FieldDelta,
        e_tag: Option<&str>,
    ) -> Result<ObservedState, CloudError>;

    /// Requests deletion; completion may be asynchronous
    async fn delete(&self, id: &str, e_tag: Option<&str>) -> Result<(), CloudError>;

    async fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, CloudError>;

    /// Adds or overwrites the given tags
    async fn set_tags(&self, arn: &str, tags: &[Tag]) -> Result<(), CloudError>;

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), CloudError>;
}

#[async_trait::async_trait]
impl<T: BackendAdapter + ?Sized> BackendAdapter for Arc<T> {
    fn kind(&self) -> &str {
        (**self).kind()
    }

    async fn create(&self, request: &CreateRequest) -> Result<ObservedState, CloudError> {
        (**self).create(request).await
    }

    async fn read(&self, id: &str) -> Result<ObservedState, CloudError> {
        (**self).read(id).await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ObservedState>, CloudError> {
        (**self).find_by_token(token).await
    }

    async fn update(
        &self,
        id: &str,
        delta: &FieldDelta,
        e_tag: Option<&str>,
    ) -> Result<ObservedState, CloudError> {
        (**self).update(id, delta, e_tag).await
    }

    async fn delete(&self, id: &str, e_tag: Option<&str>) -> Result<(), CloudError> {
        (**self).delete(id, e_tag).await
    }

    async fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, CloudError> {
        (**self).list_tags(arn).await
    }

    async fn set_tags(&self, arn: &str, tags: &[Tag]) -> Result<(), CloudError> {
        (**self).set_tags(arn, tags).await
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), CloudError> {
        (**self).remove_tags(arn, keys).await
    }
}
