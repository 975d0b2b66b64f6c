//! Readiness prober for hosted control-plane workloads

use super::workloads::{APISERVER_NAME, CONTROLLER_MANAGER_NAME};
use crate::conditions::{self, TENANT_CONDITION_PROVISIONED, TENANT_CONDITION_READY};
use crate::crd::TenantCondition;
use crate::error::Result;
use crate::store::ObjectStore;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{info, warn};

/// Workloads whose readiness gates the tenant's `Ready` condition
pub const PROBED_DEPLOYMENTS: [&str; 2] = [APISERVER_NAME, CONTROLLER_MANAGER_NAME];

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
    Missing(String),
}

/// A deployment is ready once every observed replica is ready and at least
/// the desired count has been observed.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let replicas = status.replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    replicas == ready && ready >= desired
}

/// Check the probed deployments in order. A missing deployment outranks a
/// not-ready one, so a deleted workload is reported even while another is
/// still starting.
pub async fn probe(store: &dyn ObjectStore, namespace: &str) -> Result<Readiness> {
    let mut deployments = Vec::with_capacity(PROBED_DEPLOYMENTS.len());
    for name in PROBED_DEPLOYMENTS {
        match store.get_deployment(namespace, name).await? {
            None => return Ok(Readiness::Missing(name.to_string())),
            Some(deployment) => deployments.push((name, deployment)),
        }
    }

    Ok(deployments
        .iter()
        .find(|(_, deployment)| !deployment_ready(deployment))
        .map_or(Readiness::Ready, |(name, _)| Readiness::NotReady(name.to_string())))
}

/// Fold a probe result into the tenant's conditions.
///
/// Returns true when the tenant should be checked again later.
pub fn apply(name: &str, readiness: &Readiness, conditions: &mut Vec<TenantCondition>) -> bool {
    match readiness {
        Readiness::Ready => {
            if !conditions::is_true(conditions, TENANT_CONDITION_READY) {
                info!(tenant = %name, "hosted control plane is ready");
            }
            conditions::mark_true(conditions, TENANT_CONDITION_READY, "Success", "Ready");
            false
        }
        Readiness::NotReady(deployment) => {
            warn!(tenant = %name, deployment = %deployment, "deployment is not ready");
            if conditions::is_true(conditions, TENANT_CONDITION_READY) {
                conditions::mark_false(
                    conditions,
                    TENANT_CONDITION_READY,
                    "NotReady",
                    &format!("deployment {} is not ready", deployment),
                );
            }
            true
        }
        Readiness::Missing(deployment) => {
            warn!(tenant = %name, deployment = %deployment, "deployment is missing, provisioning again");
            conditions::mark_false(
                conditions,
                TENANT_CONDITION_PROVISIONED,
                "WorkloadMissing",
                &format!("deployment {} not found", deployment),
            );
            true
        }
    }
}
