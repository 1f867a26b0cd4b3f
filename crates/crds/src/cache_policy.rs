//! CachePolicy Custom Resource Definition
//!
//! A cache policy determines the values included in the cache key and the
//! minimum, default, and maximum time objects stay cached.

use crate::status::ResourceStatus;
use crate::tag::Tag;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CachePolicySpec defines the desired state of a cache policy
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudfront.converge.dev",
    version = "v1alpha1",
    kind = "CachePolicy",
    plural = "cachepolicies",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".status.id"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicySpec {
    /// A cache policy configuration
    pub cache_policy_config: CachePolicyConfig,

    /// Tags applied to the remote cache policy
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Cache policy configuration, mirroring the remote object field for field
///
/// Unset optional fields serialize as `null` and empty lists as `[]`, so
/// clearing a field is an explicit change rather than an unmanaged one.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicyConfig {
    /// Unique name of the cache policy
    pub name: String,

    #[serde(default)]
    pub comment: Option<String>,

    /// Default time to live in seconds
    #[serde(rename = "defaultTTL", default)]
    pub default_ttl: Option<i64>,

    /// Maximum time to live in seconds
    #[serde(rename = "maxTTL", default)]
    pub max_ttl: Option<i64>,

    /// Minimum time to live in seconds
    #[serde(rename = "minTTL")]
    pub min_ttl: i64,

    #[serde(default)]
    pub parameters_in_cache_key_and_forwarded_to_origin: Option<CacheKeyParameters>,
}

/// Values included in the cache key and forwarded to the origin
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyParameters {
    #[serde(default)]
    pub cookies_config: Option<KeyItemsConfig>,

    #[serde(default)]
    pub headers_config: Option<KeyItemsConfig>,

    #[serde(default)]
    pub query_strings_config: Option<KeyItemsConfig>,

    #[serde(default)]
    pub enable_accept_encoding_gzip: bool,

    #[serde(default)]
    pub enable_accept_encoding_brotli: bool,
}

/// Behavior selector plus the item names it applies to
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyItemsConfig {
    /// none, whitelist, allExcept, all
    pub behavior: String,

    #[serde(default)]
    pub items: Vec<String>,
}
