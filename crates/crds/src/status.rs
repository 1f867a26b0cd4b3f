//! Shared status block for every managed resource kind
//!
//! All kinds reconciled by the controller use the same status shape so the
//! generic reconciler can read and write it without knowing the kind.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting that desired and observed state matched as of the
/// last successful reconcile.
pub const CONDITION_SYNCED: &str = "Synced";

/// Condition type reporting that the remote resource exists and is not in a
/// transitional lifecycle state.
pub const CONDITION_READY: &str = "Ready";

/// ResourceStatus defines the observed state of a managed remote resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Remote identifier, assigned on first successful create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Remote-generated identity (ARN-equivalent) and ownership metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_metadata: Option<ResourceMetadata>,

    /// Current version (entity tag) of the remote resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,

    /// Remote lifecycle state as reported by the service (e.g. "Deployed")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_state: Option<String>,

    /// When the remote resource was last modified, if the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<DateTime<Utc>>,

    /// Reconcile phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Consecutive failed reconcile attempts (reset on success)
    #[serde(default)]
    pub attempts: u32,

    /// Conditions, at most one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec last reconciled to completion or terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ResourceStatus {
    /// Returns the condition of the given type, if present
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    /// Returns the ARN-equivalent identifier, if known
    pub fn arn(&self) -> Option<&str> {
        self.resource_metadata.as_ref().and_then(|m| m.arn.as_deref())
    }
}

/// Remote-generated identity for a managed resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// ARN-equivalent identifier of the remote resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    /// Account that owns the remote resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_account_id: Option<String>,

    /// Region the remote resource lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A machine-readable status condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Synced, Ready)
    pub r#type: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the last status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time `status` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Returns the Kubernetes string form ("True", "False", "Unknown")
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

/// Reconcile phase
///
/// Serializes as PascalCase ("Synced", "Failed", etc.) but also accepts
/// lowercase values on input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReconcilePhase {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "creating")]
    Creating,
    #[serde(alias = "synced")]
    Synced,
    #[serde(alias = "updating")]
    Updating,
    #[serde(alias = "deleting")]
    Deleting,
    #[serde(alias = "deleted")]
    Deleted,
    #[serde(alias = "backoff")]
    Backoff,
    #[serde(alias = "failed")]
    Failed,
}

impl ReconcilePhase {
    /// Phases after which no further remote work happens for this generation
    pub fn is_terminal(self) -> bool {
        matches!(self, ReconcilePhase::Deleted | ReconcilePhase::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_camel_case() {
        let status = ResourceStatus {
            id: Some("E2QWRUHAPOMQZL".to_string()),
            e_tag: Some("E1".to_string()),
            observed_generation: Some(3),
            phase: ReconcilePhase::Synced,
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["id"], "E2QWRUHAPOMQZL");
        assert_eq!(value["eTag"], "E1");
        assert_eq!(value["observedGeneration"], 3);
        assert_eq!(value["phase"], "Synced");
        assert!(value.get("resourceMetadata").is_none());
    }

    #[test]
    fn test_phase_accepts_lowercase() {
        let phase: ReconcilePhase = serde_json::from_str("\"deleting\"").unwrap();
        assert_eq!(phase, ReconcilePhase::Deleting);
    }

    #[test]
    fn test_empty_status_deserializes() {
        let status: ResourceStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status, ResourceStatus::default());
        assert!(status.condition(CONDITION_SYNCED).is_none());
    }
}
