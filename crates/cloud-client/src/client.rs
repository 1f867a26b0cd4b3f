//! REST backend client
//!
//! Speaks a generic JSON REST surface, one instance per resource kind:
//! `/{kind}/` for create and token lookup, `/{kind}/{id}` for read, update
//! and delete, `/tags/{arn}` for tagging.

use crate::backend_trait::BackendAdapter;
use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use crds::Tag;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// REST implementation of [`BackendAdapter`]
#[derive(Debug)]
pub struct HttpBackend {
    http: HttpClient,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(default)]
    items: Vec<ObservedState>,
}

impl HttpBackend {
    /// Create a new backend client for one resource kind
    ///
    /// # Arguments
    /// * `base_url` - Service base URL (e.g., "http://cloud-api:8080")
    /// * `token` - API token for authentication
    /// * `kind` - Resource collection name (e.g., "distributions")
    pub fn new(base_url: String, token: String, kind: impl Into<String>) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_http(HttpClient::new(client, base_url, token), kind))
    }

    /// Share one HTTP connection pool between several kinds
    pub fn with_http(http: HttpClient, kind: impl Into<String>) -> Self {
        Self {
            http,
            kind: kind.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    fn collection_path(&self) -> String {
        format!("/{}/", self.kind)
    }

    fn item_path(&self, id: &str) -> String {
        format!("/{}/{}", self.kind, urlencoding::encode(id))
    }

    fn tags_path(arn: &str) -> String {
        format!("/tags/{}", urlencoding::encode(arn))
    }

    /// Prefers the eTag header over the body when the body omits it
    fn with_e_tag(mut observed: ObservedState, header: Option<String>) -> ObservedState {
        if observed.e_tag.is_none() {
            observed.e_tag = header;
        }
        observed
    }
}

#[async_trait::async_trait]
impl BackendAdapter for HttpBackend {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn create(&self, request: &CreateRequest) -> Result<ObservedState, CloudError> {
        debug!(kind = %self.kind, token = %request.idempotency_token, "Creating remote resource");
        let body = serde_json::to_value(request)?;
        let (observed, e_tag) = self.http.post(&self.collection_path(), &body).await?;
        Ok(Self::with_e_tag(observed, e_tag))
    }

    async fn read(&self, id: &str) -> Result<ObservedState, CloudError> {
        let (observed, e_tag) = self.http.get(&self.item_path(id)).await?;
        Ok(Self::with_e_tag(observed, e_tag))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ObservedState>, CloudError> {
        let query = self.http.build_query_string(&[("idempotencyToken", token)]);
        let path = format!("{}?{}", self.collection_path(), query);
        let (list, _): (ResourceList, _) = self.http.get(&path).await?;
        Ok(list.items.into_iter().next())
    }

    async fn update(
        &self,
        id: &str,
        delta: &FieldDelta,
        e_tag: Option<&str>,
    ) -> Result<ObservedState, CloudError> {
        debug!(kind = %self.kind, id = %id, paths = ?delta.paths(), "Updating remote resource");
        let mut patch = json!({});
        delta.apply_to(&mut patch);
        let body = json!({ "config": patch });
        let (observed, new_e_tag) = self.http.patch(&self.item_path(id), &body, e_tag).await?;
        Ok(Self::with_e_tag(observed, new_e_tag))
    }

    async fn delete(&self, id: &str, e_tag: Option<&str>) -> Result<(), CloudError> {
        self.http.delete(&self.item_path(id), e_tag).await
    }

    async fn list_tags(&self, arn: &str) -> Result<Vec<Tag>, CloudError> {
        let (list, _): (TagList, _) = self.http.get(&Self::tags_path(arn)).await?;
        Ok(list.tags)
    }

    async fn set_tags(&self, arn: &str, tags: &[Tag]) -> Result<(), CloudError> {
        self.http
            .post_empty(&Self::tags_path(arn), &json!({ "tags": tags }))
            .await
    }

    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<(), CloudError> {
        let path = format!("{}/remove", Self::tags_path(arn));
        self.http.post_empty(&path, &json!({ "keys": keys })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_encoded() {
        let backend = HttpBackend::new(
            "http://cloud-api:8080/".to_string(),
            "token".to_string(),
            "distributions",
        )
        .unwrap();
        assert_eq!(backend.kind(), "distributions");
        assert_eq!(backend.base_url(), "http://cloud-api:8080");
        assert_eq!(backend.collection_path(), "/distributions/");
        assert_eq!(backend.item_path("E2Q/1"), "/distributions/E2Q%2F1");
        assert_eq!(
            HttpBackend::tags_path("arn:cloud:distribution/E2Q"),
            "/tags/arn%3Acloud%3Adistribution%2FE2Q"
        );
    }

    #[test]
    fn test_header_e_tag_only_fills_missing() {
        let observed = ObservedState {
            id: "CP1".to_string(),
            arn: None,
            e_tag: Some("E2".to_string()),
            lifecycle_state: None,
            config: json!({}),
            tags: vec![],
            last_modified_time: None,
            fetched_at: chrono::Utc::now(),
        };
        let kept = HttpBackend::with_e_tag(observed.clone(), Some("E9".to_string()));
        assert_eq!(kept.e_tag.as_deref(), Some("E2"));

        let filled = HttpBackend::with_e_tag(
            ObservedState { e_tag: None, ..observed },
            Some("E9".to_string()),
        );
        assert_eq!(filled.e_tag.as_deref(), Some("E9"));
    }
}
