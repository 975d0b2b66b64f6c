//! Tenant Custom Resource Definition
//!
//! A Tenant is cluster-scoped; its name doubles as the host namespace holding
//! the tenant's hosted control plane and as the DNS label of its API server.

use crate::conditions::{
    self, CONDITION_FALSE, CONDITION_TRUE, TENANT_CONDITION_PROVISIONED, TENANT_CONDITION_READY,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tenant is the Schema for the tenants API
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tenancy.kcp.io",
    version = "v1alpha1",
    kind = "Tenant",
    status = "TenantStatus",
    shortname = "tn",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {}

/// Status of the Tenant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Current phase, projected from conditions and the deletion marker
    #[serde(default)]
    pub phase: TenantPhase,
    /// Conditions representing provisioning and readiness
    #[serde(default)]
    pub conditions: Vec<TenantCondition>,
}

/// Phase of the tenant lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum TenantPhase {
    /// No conditions recorded yet
    #[default]
    Pending,
    /// Control-plane artifacts are being created
    Provisioning,
    /// All artifacts exist, workloads not yet ready
    Provisioned,
    /// Hosted control plane is serving
    Ready,
    /// Hosted control plane reported not ready
    Failed,
    /// Deletion requested
    Terminating,
}

impl TenantPhase {
    /// Derive the phase from conditions and the deletion marker.
    ///
    /// Later rules win: `Ready` outranks `Provisioned`, and a deletion marker
    /// outranks everything.
    pub fn project(conditions: &[TenantCondition], deleting: bool) -> Self {
        if deleting {
            return TenantPhase::Terminating;
        }

        let mut phase = TenantPhase::Pending;
        match conditions::get(conditions, TENANT_CONDITION_PROVISIONED).map(|c| c.status.as_str()) {
            Some(CONDITION_FALSE) => phase = TenantPhase::Provisioning,
            Some(CONDITION_TRUE) => phase = TenantPhase::Provisioned,
            _ => {}
        }
        match conditions::get(conditions, TENANT_CONDITION_READY).map(|c| c.status.as_str()) {
            Some(CONDITION_FALSE) => phase = TenantPhase::Failed,
            Some(CONDITION_TRUE) => phase = TenantPhase::Ready,
            _ => {}
        }
        phase
    }
}

impl std::fmt::Display for TenantPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TenantPhase::Pending => "Pending",
            TenantPhase::Provisioning => "Provisioning",
            TenantPhase::Provisioned => "Provisioned",
            TenantPhase::Ready => "Ready",
            TenantPhase::Failed => "Failed",
            TenantPhase::Terminating => "Terminating",
        };
        f.write_str(name)
    }
}

/// Condition of the tenant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Tenant {
    /// Host namespace holding this tenant's control plane.
    pub fn control_plane_namespace(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn conditions(&self) -> &[TenantCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn conditions_mut(&mut self) -> &mut Vec<TenantCondition> {
        &mut self.status.get_or_insert_with(TenantStatus::default).conditions
    }

    /// Phase last persisted to the store.
    pub fn phase(&self) -> TenantPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    pub fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_string());
        }
    }

    pub fn remove_finalizer(&mut self, finalizer: &str) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
    }
}
