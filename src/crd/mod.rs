//! Custom Resource Definitions for the Tenant operator
//!
//! Defines the CRD that the operator manages:
//! - Tenant: a logical tenant owning one hosted control plane

mod tenant;

pub use tenant::{Tenant, TenantCondition, TenantPhase, TenantSpec, TenantStatus};
