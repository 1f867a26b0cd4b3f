//! Converge CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the resource kinds managed by
//! the Converge controllers, plus the status block they all share.

pub mod cache_policy;
pub mod distribution;
pub mod status;
pub mod tag;

pub use cache_policy::*;
pub use distribution::*;
pub use status::*;
pub use tag::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every CRD this crate defines, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![CachePolicy::crd(), Distribution::crd()]
}
