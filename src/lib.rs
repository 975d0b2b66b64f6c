//! Tenant Control-Plane Operator
//!
//! A Kubernetes operator that provisions an isolated hosted control plane
//! (kube-apiserver and kube-controller-manager backed by a shared etcd) for
//! every `Tenant` of a host cluster.
//!
//! ## Custom Resources
//!
//! - `Tenant`: cluster-scoped; its name is the namespace holding the tenant's
//!   control plane
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: tenancy.kcp.io/v1alpha1
//! kind: Tenant
//! metadata:
//!   name: t1
//! spec: {}
//! ```
//!
//! Once `t1` reaches phase `Ready`, the namespace `t1` holds the
//! `server-cert`, `kubeconfig-admin` and `kubeconfig-controller-manager`
//! secrets plus the control-plane Deployments and Service.

pub mod conditions;
pub mod config;
pub mod controllers;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod kubeconfig;
pub mod pki;
pub mod store;

pub use config::ProvisionConfig;
pub use controllers::{Controller, TenantController, TenantReconciler};
pub use crd::{Tenant, TenantCondition, TenantPhase, TenantSpec, TenantStatus};
pub use error::{OperatorError, Result};
pub use store::{KubeStore, ObjectStore};
