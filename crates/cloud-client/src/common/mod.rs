//! Common utilities for the REST backend
//!
//! Provides the authenticated request helpers shared by every resource kind.

use crate::error::CloudError;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

/// HTTP client wrapper with authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn with_headers(&self, builder: RequestBuilder, if_match: Option<&str>) -> RequestBuilder {
        let builder = builder
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            // one id per attempt, retries included
            .header("X-Request-Id", Uuid::new_v4().to_string());
        match if_match {
            Some(e_tag) => builder.header("If-Match", e_tag),
            None => builder,
        }
    }

    /// Converts a non-success response into a classified error
    async fn check(method: &str, path: &str, response: Response) -> Result<Response, CloudError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::from_status(
            status.as_u16(),
            format!("{} {} failed: {} - {}", method, path, status, body),
        ))
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<(T, Option<String>), CloudError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .with_headers(self.client.get(&url), None)
            .send()
            .await?;
        let response = Self::check("GET", path, response).await?;
        let e_tag = header_e_tag(&response);
        Ok((response.json().await?, e_tag))
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(T, Option<String>), CloudError> {
        let url = self.build_url(path);
        debug!("POST {} with body: {}", url, body);

        let response = self
            .with_headers(self.client.post(&url), None)
            .json(body)
            .send()
            .await?;
        let response = Self::check("POST", path, response).await?;
        let e_tag = header_e_tag(&response);
        Ok((response.json().await?, e_tag))
    }

    /// Make a POST request whose response body is ignored
    pub async fn post_empty(&self, path: &str, body: &serde_json::Value) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("POST {} with body: {}", url, body);

        let response = self
            .with_headers(self.client.post(&url), None)
            .json(body)
            .send()
            .await?;
        Self::check("POST", path, response).await?;
        Ok(())
    }

    /// Make a PATCH request guarded by an optional entity tag
    pub async fn patch<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
        if_match: Option<&str>,
    ) -> Result<(T, Option<String>), CloudError> {
        let url = self.build_url(path);
        debug!("PATCH {} with body: {}", url, body);

        let response = self
            .with_headers(self.client.patch(&url), if_match)
            .json(body)
            .send()
            .await?;
        let response = Self::check("PATCH", path, response).await?;
        let e_tag = header_e_tag(&response);
        Ok((response.json().await?, e_tag))
    }

    /// Make a DELETE request guarded by an optional entity tag
    pub async fn delete(&self, path: &str, if_match: Option<&str>) -> Result<(), CloudError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self
            .with_headers(self.client.delete(&url), if_match)
            .send()
            .await?;
        Self::check("DELETE", path, response).await?;
        Ok(())
    }

    /// Build query string from filters
    pub fn build_query_string(&self, filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn header_e_tag(response: &Response) -> Option<String> {
    response
        .headers()
        .get("ETag")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_and_query() {
        let http = HttpClient::new(Client::new(), "http://cloud:8080/".to_string(), "t".to_string());
        assert_eq!(http.build_url("/cache-policies/"), "http://cloud:8080/cache-policies/");
        assert_eq!(http.build_url("https://other/x"), "https://other/x");
        assert_eq!(
            http.build_query_string(&[("idempotencyToken", "default/my policy")]),
            "idempotencyToken=default%2Fmy%20policy"
        );
        assert_eq!(http.auth_header(), "Bearer t");
    }
}
