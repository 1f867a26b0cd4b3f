//! Per-kind behavior table
//!
//! Everything that differs between resource kinds (immutable fields, delete
//! guards, lifecycle states) is data, loaded from YAML or taken from the
//! built-in table. The reconciler itself has no per-kind code.

use crate::differ::values_cover;
use crate::error::ReconcileError;
use crate::store::ResourceKey;
use crds::{Tag, CONDITION_READY, CONDITION_SYNCED};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default prefix of tags owned by the controller
pub const DEFAULT_SYSTEM_TAG_PREFIX: &str = "converge.dev/";

/// A field that must hold `value` on the remote resource before it can be deleted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteGuard {
    /// Dotted path in the remote configuration
    pub field: String,
    pub value: Value,
}

impl DeleteGuard {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// A field absent from the observed configuration has nothing to guard
    pub fn is_satisfied_by(&self, config: &Value) -> bool {
        match cloud_client::lookup(config, &self.field) {
            Some(observed) => values_cover(&self.value, observed),
            None => true,
        }
    }
}

/// Which condition signals that a resource has converged
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConvergenceSignal {
    #[default]
    Synced,
    Ready,
}

impl ConvergenceSignal {
    pub fn condition_type(self) -> &'static str {
        match self {
            ConvergenceSignal::Synced => CONDITION_SYNCED,
            ConvergenceSignal::Ready => CONDITION_READY,
        }
    }
}

/// Behavior of one resource kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindConfig {
    /// Kind name, also the backend collection name (e.g. "distributions")
    pub kind: String,

    /// Fields whose change requires replacing the remote resource
    #[serde(default)]
    pub immutable_fields: Vec<String>,

    /// Fields that may be updated in place; empty means every field
    #[serde(default)]
    pub mutable_fields: Vec<String>,

    /// Conditions the remote resource must meet before it can be deleted
    #[serde(default)]
    pub delete_guards: Vec<DeleteGuard>,

    /// Remote lifecycle states that count as ready; empty means the kind has no lifecycle
    #[serde(default)]
    pub ready_states: Vec<String>,

    #[serde(default)]
    pub convergence: ConvergenceSignal,

    #[serde(default = "default_system_tag_prefix")]
    pub system_tag_prefix: String,

    /// Consecutive NotFound reads of a known id tolerated before it is declared stale
    #[serde(default = "default_max_read_misses")]
    pub max_read_misses: u32,

    /// Ceiling for confirming a delete guard within one pass
    #[serde(default = "default_guard_wait_seconds")]
    pub guard_wait_seconds: u64,

    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,

    /// Requeue delay while waiting for a transitional resource to settle
    #[serde(default = "default_ready_requeue_millis")]
    pub ready_requeue_millis: u64,
}

fn default_system_tag_prefix() -> String {
    DEFAULT_SYSTEM_TAG_PREFIX.to_string()
}

fn default_max_read_misses() -> u32 {
    3
}

fn default_guard_wait_seconds() -> u64 {
    60
}

fn default_poll_interval_millis() -> u64 {
    2000
}

fn default_ready_requeue_millis() -> u64 {
    15_000
}

impl KindConfig {
    /// A kind with no immutable fields, guards, or lifecycle
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            immutable_fields: Vec::new(),
            mutable_fields: Vec::new(),
            delete_guards: Vec::new(),
            ready_states: Vec::new(),
            convergence: ConvergenceSignal::Synced,
            system_tag_prefix: default_system_tag_prefix(),
            max_read_misses: default_max_read_misses(),
            guard_wait_seconds: default_guard_wait_seconds(),
            poll_interval_millis: default_poll_interval_millis(),
            ready_requeue_millis: default_ready_requeue_millis(),
        }
    }

    /// Cache policies: plain CRUD, everything mutable
    pub fn cache_policies() -> Self {
        Self {
            mutable_fields: vec!["cachePolicyConfig".to_string()],
            ..Self::new("cache-policies")
        }
    }

    /// Distributions: asynchronously deployed, must be disabled before deletion
    pub fn distributions() -> Self {
        Self {
            immutable_fields: vec!["distributionConfig.callerReference".to_string()],
            mutable_fields: vec!["distributionConfig".to_string()],
            delete_guards: vec![DeleteGuard::new(
                "distributionConfig.enabled",
                Value::Bool(false),
            )],
            ready_states: vec!["Deployed".to_string()],
            convergence: ConvergenceSignal::Ready,
            guard_wait_seconds: 120,
            ..Self::new("distributions")
        }
    }

    pub fn is_immutable(&self, path: &str) -> bool {
        self.immutable_fields.iter().any(|f| path_within(path, f))
    }

    /// Immutable paths win over mutable ones
    pub fn is_mutable(&self, path: &str) -> bool {
        if self.is_immutable(path) {
            return false;
        }
        self.mutable_fields.is_empty() || self.mutable_fields.iter().any(|f| path_within(path, f))
    }

    pub fn has_lifecycle(&self) -> bool {
        !self.ready_states.is_empty()
    }

    /// Whether a remote resource in this lifecycle state may be modified
    pub fn is_ready_state(&self, state: Option<&str>) -> bool {
        if !self.has_lifecycle() {
            return true;
        }
        state.is_some_and(|s| self.ready_states.iter().any(|r| r.eq_ignore_ascii_case(s)))
    }

    pub fn is_system_tag(&self, key: &str) -> bool {
        key.starts_with(&self.system_tag_prefix)
    }

    /// Tags the controller adds to every resource it creates
    pub fn system_tags(&self, key: &ResourceKey) -> Vec<Tag> {
        vec![
            Tag::new(format!("{}namespace", self.system_tag_prefix), key.namespace.clone()),
            Tag::new(format!("{}managed-by", self.system_tag_prefix), "converge-controller"),
        ]
    }

    pub fn guard_wait(&self) -> Duration {
        Duration::from_secs(self.guard_wait_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis.max(1))
    }

    pub fn ready_requeue(&self) -> Duration {
        Duration::from_millis(self.ready_requeue_millis)
    }
}

/// `path` equals `prefix` or lies under it
fn path_within(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

#[derive(Debug, Deserialize)]
struct KindFile {
    kinds: Vec<KindConfig>,
}

/// Lookup table of kind configurations
#[derive(Debug, Clone, Default)]
pub struct KindTable {
    kinds: HashMap<String, KindConfig>,
}

impl KindTable {
    /// The kinds this controller knows without any configuration file
    pub fn builtin() -> Self {
        let mut table = Self::default();
        table.insert(KindConfig::cache_policies());
        table.insert(KindConfig::distributions());
        table
    }

    /// Parses a `kinds:` list. Entries replace built-ins of the same name.
    pub fn from_yaml(yaml: &str) -> Result<Self, ReconcileError> {
        let file: KindFile = serde_yaml::from_str(yaml)
            .map_err(|e| ReconcileError::InvalidSpec(format!("invalid kind table: {}", e)))?;
        let mut table = Self::builtin();
        for kind in file.kinds {
            table.insert(kind);
        }
        Ok(table)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::InvalidSpec(format!("cannot read kind table {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn insert(&mut self, kind: KindConfig) {
        self.kinds.insert(kind.kind.clone(), kind);
    }

    pub fn get(&self, kind: &str) -> Result<&KindConfig, ReconcileError> {
        self.kinds
            .get(kind)
            .ok_or_else(|| ReconcileError::UnknownKind(kind.to_string()))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
