//! Condition reporting
//!
//! Keeps exactly one condition per type and only moves
//! `lastTransitionTime` when the status actually flips, so repeated
//! identical passes never produce status churn.

use crate::error::ReconcileError;
use crate::kind::KindConfig;
use chrono::{DateTime, Utc};
use cloud_client::ObservedState;
use crds::{Condition, ConditionStatus, ResourceStatus, CONDITION_READY, CONDITION_SYNCED};

/// Sets or replaces the condition of `condition_type`; returns whether anything changed
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> bool {
    let message = Some(message.into()).filter(|m| !m.is_empty());
    let reason = Some(reason.to_string());

    match conditions.iter_mut().find(|c| c.r#type == condition_type) {
        Some(existing) => {
            if existing.status == status && existing.reason == reason && existing.message == message {
                return false;
            }
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now);
            }
            existing.reason = reason;
            existing.message = message;
            true
        }
        None => {
            conditions.push(Condition {
                r#type: condition_type.to_string(),
                status,
                reason,
                message,
                last_transition_time: Some(now),
            });
            true
        }
    }
}

/// Desired and observed state matched after the last pass
pub fn report_synced(status: &mut ResourceStatus, now: DateTime<Utc>) -> bool {
    set_condition(
        &mut status.conditions,
        CONDITION_SYNCED,
        ConditionStatus::True,
        "ReconcileSuccess",
        "",
        now,
    )
}

/// A retryable failure: outcome unknown until the next attempt
pub fn report_retrying(
    status: &mut ResourceStatus,
    error: &ReconcileError,
    attempt: u32,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        &mut status.conditions,
        CONDITION_SYNCED,
        ConditionStatus::Unknown,
        error.reason(),
        format!("{} (attempt {})", error, attempt),
        now,
    )
}

/// A permanent failure: no retry until the spec changes
pub fn report_failed(status: &mut ResourceStatus, error: &ReconcileError, now: DateTime<Utc>) -> bool {
    set_condition(
        &mut status.conditions,
        CONDITION_SYNCED,
        ConditionStatus::False,
        error.reason(),
        error.to_string(),
        now,
    )
}

/// Derives `Ready` from the latest remote read
pub fn report_ready(
    status: &mut ResourceStatus,
    kind: &KindConfig,
    observed: Option<&ObservedState>,
    now: DateTime<Utc>,
) -> bool {
    let (value, reason, message) = match observed {
        None => (
            ConditionStatus::False,
            "NotCreated",
            "remote resource does not exist".to_string(),
        ),
        Some(o) if kind.is_ready_state(o.lifecycle_state.as_deref()) => {
            (ConditionStatus::True, "Available", String::new())
        }
        Some(o) => (
            ConditionStatus::False,
            "Transitioning",
            format!(
                "remote state is {}",
                o.lifecycle_state.as_deref().unwrap_or("unknown")
            ),
        ),
    };
    set_condition(&mut status.conditions, CONDITION_READY, value, reason, message, now)
}

/// Whether the kind's convergence condition is True
pub fn is_converged(status: &ResourceStatus, kind: &KindConfig) -> bool {
    status
        .condition(kind.convergence.condition_type())
        .is_some_and(|c| c.status == ConditionStatus::True)
}
