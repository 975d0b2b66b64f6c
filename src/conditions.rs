//! Kubernetes-standard status condition helpers
//!
//! Provides constants and builder functions for managing Tenant status
//! conditions following the Kubernetes API conventions.

use crate::crd::TenantCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

// Tenant condition types
pub const TENANT_CONDITION_PROVISIONED: &str = "Provisioned";
pub const TENANT_CONDITION_READY: &str = "Ready";

// Finalizer names
pub const TENANT_FINALIZER: &str = "tenancy.kcp.io/tenants";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> TenantCondition {
    TenantCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<TenantCondition>, new: TenantCondition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

/// Mark a condition True.
pub fn mark_true(conditions: &mut Vec<TenantCondition>, condition_type: &str, reason: &str, message: &str) {
    set_condition(conditions, build_condition(condition_type, CONDITION_TRUE, reason, message));
}

/// Mark a condition False.
pub fn mark_false(conditions: &mut Vec<TenantCondition>, condition_type: &str, reason: &str, message: &str) {
    set_condition(conditions, build_condition(condition_type, CONDITION_FALSE, reason, message));
}

/// Returns the condition with the given type, if present.
pub fn get<'a>(conditions: &'a [TenantCondition], condition_type: &str) -> Option<&'a TenantCondition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

pub fn has(conditions: &[TenantCondition], condition_type: &str) -> bool {
    get(conditions, condition_type).is_some()
}

pub fn is_true(conditions: &[TenantCondition], condition_type: &str) -> bool {
    get(conditions, condition_type).is_some_and(|c| c.status == CONDITION_TRUE)
}

pub fn is_false(conditions: &[TenantCondition], condition_type: &str) -> bool {
    get(conditions, condition_type).is_some_and(|c| c.status == CONDITION_FALSE)
}

/// True when the condition is Unknown or absent.
pub fn is_unknown(conditions: &[TenantCondition], condition_type: &str) -> bool {
    get(conditions, condition_type).map_or(true, |c| c.status == CONDITION_UNKNOWN)
}

pub fn get_reason(conditions: &[TenantCondition], condition_type: &str) -> String {
    get(conditions, condition_type)
        .and_then(|c| c.reason.clone())
        .unwrap_or_default()
}

pub fn get_message(conditions: &[TenantCondition], condition_type: &str) -> String {
    get(conditions, condition_type)
        .and_then(|c| c.message.clone())
        .unwrap_or_default()
}
