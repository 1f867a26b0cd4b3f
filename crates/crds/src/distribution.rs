//! Distribution Custom Resource Definition
//!
//! A distribution must be disabled, and the disable fully deployed, before
//! the remote service accepts a delete.

use crate::status::ResourceStatus;
use crate::tag::Tag;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DistributionSpec defines the desired state of a distribution
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudfront.converge.dev",
    version = "v1alpha1",
    kind = "Distribution",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.remoteState"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSpec {
    pub distribution_config: DistributionConfig,

    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Distribution configuration
///
/// Like the cache policy config, unset fields serialize explicitly so that
/// clearing one reaches the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionConfig {
    /// Caller-supplied uniqueness token; cannot change after creation
    #[serde(default)]
    pub caller_reference: Option<String>,

    pub comment: String,

    /// Whether the distribution accepts viewer requests
    pub enabled: bool,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub default_root_object: Option<String>,

    #[serde(default)]
    pub price_class: Option<String>,

    #[serde(default)]
    pub http_version: Option<String>,

    #[serde(default)]
    pub origins: Vec<Origin>,

    #[serde(default)]
    pub default_cache_behavior: Option<CacheBehavior>,
}

/// An origin the distribution fetches content from
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub id: String,
    pub domain_name: String,
    #[serde(default)]
    pub origin_path: Option<String>,
}

/// The default cache behavior
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheBehavior {
    pub target_origin_id: String,
    /// allow-all, https-only, redirect-to-https
    pub viewer_protocol_policy: String,
    #[serde(default)]
    pub cache_policy_id: Option<String>,
    #[serde(default)]
    pub compress: Option<bool>,
}
