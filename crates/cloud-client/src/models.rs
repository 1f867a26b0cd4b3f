//! Remote resource models
//!
//! Configuration payloads are carried as JSON objects whose field names
//! mirror the declarative spec one-for-one, so diffs are structural.

use chrono::{DateTime, Utc};
use crds::Tag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of a remote resource as last fetched from the service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    pub id: String,
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default, rename = "eTag")]
    pub e_tag: Option<String>,
    /// Remote lifecycle state, for kinds that have one ("InProgress", "Deployed")
    #[serde(default, rename = "state")]
    pub lifecycle_state: Option<String>,
    #[serde(default)]
    pub config: Value,
    /// Filled from `list_tags`; `read` leaves it empty
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub last_modified_time: Option<DateTime<Utc>>,
    /// When this snapshot was taken
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl ObservedState {
    /// Value of a dotted field path in the observed configuration
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup(&self.config, path)
    }
}

/// Everything needed to create a remote resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub config: Value,
    pub tags: Vec<Tag>,
    /// Deterministic token identifying the declarative resource; repeated
    /// creates with the same token must not produce duplicates
    pub idempotency_token: String,
}

/// One field-level change: set `path` to `value`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub path: String,
    pub value: Value,
}

/// Ordered set of field changes for one update call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FieldDelta {
    pub changes: Vec<FieldChange>,
}

impl FieldDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.changes.push(FieldChange {
            path: path.into(),
            value,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.path.as_str()).collect()
    }

    /// Applies every change to `target`, creating intermediate objects
    pub fn apply_to(&self, target: &mut Value) {
        for change in &self.changes {
            assign(target, &change.path, change.value.clone());
        }
    }
}

/// Resolves a dotted path (`a.b.c`) inside a JSON value
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Writes `new_value` at a dotted path, creating objects along the way
pub fn assign(target: &mut Value, path: &str, new_value: Value) {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *current = new_value;
        return;
    };
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            _ => return,
        };
    }
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = current {
        map.insert((*last).to_string(), new_value);
    }
}
