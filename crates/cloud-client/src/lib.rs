//! Remote cloud resource client
//!
//! The [`BackendAdapter`] trait abstracts one resource kind's CRUD and tagging
//! API on the remote service. Every failure is a [`CloudError`] that
//! classifies itself as retryable or permanent.
//!
//! # Example
//!
//! ```no_run
//! use cloud_client::{BackendAdapter, CreateRequest, HttpBackend, RetryPolicy, RetryingBackend};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new(
//!     "http://cloud-api:8080".to_string(),
//!     "your-api-token".to_string(),
//!     "cache-policies",
//! )?;
//! let backend = RetryingBackend::new(backend, RetryPolicy::default());
//!
//! let created = backend
//!     .create(&CreateRequest {
//!         config: json!({"name": "my-policy", "minTTL": 600}),
//!         tags: vec![],
//!         idempotency_token: "default/my-policy/uid".to_string(),
//!     })
//!     .await?;
//! let observed = backend.read(&created.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **HTTP adapter**: generic JSON REST surface with `If-Match` eTags
//! - **Retry wrapper**: per-call timeouts and in-call retry of throttling
//! - **Mock adapter** (`test-util`): in-memory backend with simulated
//!   provisioning latency and failure injection

pub mod client;
pub mod common;
pub mod error;
pub mod models;
pub mod retry;
#[path = "trait.rs"]
pub mod backend_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use backend_trait::BackendAdapter;
pub use client::HttpBackend;
pub use common::HttpClient;
pub use error::{CloudError, ErrorClass};
pub use models::*;
pub use retry::{RetryPolicy, RetryingBackend};
#[cfg(feature = "test-util")]
pub use mock::{BackendCall, MockBackend};
