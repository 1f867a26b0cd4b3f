//! Desired vs observed diffing
//!
//! Produces the ordered list of remote operations that moves observed state
//! to desired state. Pure functions only; nothing here talks to the backend.

use crate::kind::{DeleteGuard, KindConfig};
use crate::store::DesiredState;
use cloud_client::{lookup, FieldDelta, ObservedState};
use crds::Tag;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One step of a reconcile plan
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOperation {
    /// Create the remote resource with user tags; system tags are added on apply
    Create { config: Value, tags: Vec<Tag> },
    Update(FieldDelta),
    /// Add or overwrite tags
    SetTags(Vec<Tag>),
    RemoveTags(Vec<String>),
    Delete,
    /// Re-read until every guard holds; never proceed to `Delete` before that
    Confirm(Vec<DeleteGuard>),
}

impl RemoteOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOperation::Create { .. } => "Create",
            RemoteOperation::Update(_) => "Update",
            RemoteOperation::SetTags(_) => "SetTags",
            RemoteOperation::RemoveTags(_) => "RemoveTags",
            RemoteOperation::Delete => "Delete",
            RemoteOperation::Confirm(_) => "Confirm",
        }
    }
}

/// Computes the plan converging `observed` to `desired`
///
/// - no observed state: `[Create]`
/// - an immutable field differs: `[Delete, Create]`
/// - otherwise `[Update]` for mutable differences, then tag operations
pub fn plan(
    kind: &KindConfig,
    desired: &DesiredState,
    observed: Option<&ObservedState>,
) -> Vec<RemoteOperation> {
    let Some(observed) = observed else {
        return vec![create_op(kind, desired)];
    };

    if !immutable_changes(kind, &desired.config, &observed.config).is_empty() {
        return vec![RemoteOperation::Delete, create_op(kind, desired)];
    }

    let mut ops = Vec::new();
    let delta = diff_config(kind, &desired.config, &observed.config);
    if !delta.is_empty() {
        ops.push(RemoteOperation::Update(delta));
    }

    let (to_set, to_remove) = diff_tags(kind, &desired.tags, &observed.tags);
    if !to_set.is_empty() {
        ops.push(RemoteOperation::SetTags(to_set));
    }
    if !to_remove.is_empty() {
        ops.push(RemoteOperation::RemoveTags(to_remove));
    }
    ops
}

/// Computes the plan removing `observed`, honoring the kind's delete guards
pub fn plan_delete(kind: &KindConfig, observed: &ObservedState) -> Vec<RemoteOperation> {
    let pending: Vec<DeleteGuard> = kind
        .delete_guards
        .iter()
        .filter(|g| !g.is_satisfied_by(&observed.config))
        .cloned()
        .collect();

    if pending.is_empty() {
        return vec![RemoteOperation::Delete];
    }

    let delta = pending
        .iter()
        .fold(FieldDelta::new(), |delta, g| delta.set(g.field.clone(), g.value.clone()));
    vec![
        RemoteOperation::Update(delta),
        RemoteOperation::Confirm(pending),
        RemoteOperation::Delete,
    ]
}

fn create_op(kind: &KindConfig, desired: &DesiredState) -> RemoteOperation {
    RemoteOperation::Create {
        config: strip_nulls(&desired.config),
        tags: desired
            .tags
            .iter()
            .filter(|t| !kind.is_system_tag(&t.key))
            .cloned()
            .collect(),
    }
}

/// Immutable fields whose desired value differs from the observed one
pub fn immutable_changes(kind: &KindConfig, desired: &Value, observed: &Value) -> Vec<String> {
    kind.immutable_fields
        .iter()
        .filter(|field| match lookup(desired, field) {
            None | Some(Value::Null) => false,
            Some(wanted) => !lookup(observed, field).is_some_and(|actual| values_cover(wanted, actual)),
        })
        .cloned()
        .collect()
}

/// Mutable field-level differences, as dotted leaf paths in desired order
pub fn diff_config(kind: &KindConfig, desired: &Value, observed: &Value) -> FieldDelta {
    let mut changes = Vec::new();
    collect_changes("", desired, Some(observed), &mut changes);
    changes
        .into_iter()
        .filter(|(path, _)| kind.is_mutable(path))
        .fold(FieldDelta::new(), |delta, (path, value)| delta.set(path, value))
}

fn collect_changes(prefix: &str, desired: &Value, observed: Option<&Value>, out: &mut Vec<(String, Value)>) {
    match (desired, observed) {
        (Value::Object(wanted), Some(Value::Object(actual))) => {
            for (key, value) in wanted {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_changes(&path, value, actual.get(key), out);
            }
        }
        // absent, null and an empty list all mean "not set"
        (wanted, None) if is_unset(wanted) => {}
        (wanted, Some(actual)) if values_cover(wanted, actual) => {}
        (wanted, _) => {
            if !prefix.is_empty() {
                out.push((prefix.to_string(), wanted.clone()));
            }
        }
    }
}

/// Whether `observed` satisfies `desired`
///
/// Numbers compare numerically. Objects are covered when every desired key
/// is covered, so server-side defaults never count as drift. Arrays compare
/// element by element and must have the same length.
pub fn values_cover(desired: &Value, observed: &Value) -> bool {
    if is_unset(desired) && is_unset(observed) {
        return true;
    }
    match (desired, observed) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Object(wanted), Value::Object(actual)) => wanted.iter().all(|(key, value)| {
            match actual.get(key) {
                Some(found) => values_cover(value, found),
                None => is_unset(value),
            }
        }),
        (Value::Array(wanted), Value::Array(actual)) => {
            wanted.len() == actual.len()
                && wanted.iter().zip(actual).all(|(w, a)| values_cover(w, a))
        }
        _ => desired == observed,
    }
}

/// A cleared field: `null` or an empty list
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Drops `null` object members, recursively; nothing to clear on a new resource
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Tag differences keyed on tag key, ignoring system tags on both sides
///
/// Returns `(to_set, to_remove)`.
pub fn diff_tags(kind: &KindConfig, desired: &[Tag], observed: &[Tag]) -> (Vec<Tag>, Vec<String>) {
    let current: HashMap<&str, &str> = observed
        .iter()
        .filter(|t| !kind.is_system_tag(&t.key))
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    let wanted: HashSet<&str> = desired
        .iter()
        .filter(|t| !kind.is_system_tag(&t.key))
        .map(|t| t.key.as_str())
        .collect();

    let to_set = desired
        .iter()
        .filter(|t| !kind.is_system_tag(&t.key))
        .filter(|t| current.get(t.key.as_str()) != Some(&t.value.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let to_remove = observed
        .iter()
        .filter(|t| !kind.is_system_tag(&t.key))
        .filter(|t| !wanted.contains(t.key.as_str()))
        .filter(|t| seen.insert(t.key.clone()))
        .map(|t| t.key.clone())
        .collect();

    (to_set, to_remove)
}

/// User-visible tag equality: same keys and values, system tags ignored
pub fn tags_equal(kind: &KindConfig, a: &[Tag], b: &[Tag]) -> bool {
    let (to_set, to_remove) = diff_tags(kind, a, b);
    to_set.is_empty() && to_remove.is_empty()
}
