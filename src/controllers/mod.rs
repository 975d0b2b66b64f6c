//! Controllers for the Tenant operator
//!
//! The tenant controller watches Tenant resources and drives each one through
//! provisioning and readiness checks of its hosted control plane.

pub mod provisioning;
pub mod readiness;
mod tenant;
pub mod workloads;

pub use provisioning::{Pipeline, PhaseFailure, ProvisionPhase};
pub use readiness::Readiness;
pub use tenant::{error_policy, TenantController, TenantReconciler};

use crate::error::OperatorError;

/// Common trait for all controllers
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Start the controller's reconciliation loop
    async fn run(&self) -> Result<(), OperatorError>;

    /// Get the controller name for logging
    fn name(&self) -> &'static str;
}
