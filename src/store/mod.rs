//! Host object store
//!
//! Every read and write the reconcilers perform against the host cluster goes
//! through [`ObjectStore`], so the state machine can run against the real API
//! server or an in-memory store in tests.

mod api;
#[cfg(test)]
mod memory;

pub use api::KubeStore;
#[cfg(test)]
pub use memory::MemoryStore;

use crate::crd::Tenant;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};

#[cfg(test)]
use mockall::automock;

/// Typed access to the objects a tenant owns in the host cluster
///
/// Lookups return `Ok(None)` for absent objects. Creates return
/// [`OperatorError::AlreadyExists`] when another actor won the race.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>>;

    /// Write back finalizers, owner references and status of `tenant`
    ///
    /// Reads the stored object first and copies only those fields onto it.
    /// A tenant that no longer exists is not an error.
    async fn persist_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<()>;
}

/// Treat a lost create race as success.
pub fn ignore_already_exists(result: Result<()>) -> Result<()> {
    match result {
        Err(OperatorError::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
