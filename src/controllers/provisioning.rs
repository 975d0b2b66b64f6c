//! Provisioning pipeline
//!
//! Brings a tenant's control-plane artifacts into existence in a fixed order.
//! Every phase is create-if-absent: an existing artifact is never read back,
//! compared or regenerated, which makes the pipeline safe to re-run after a
//! partial failure or a duplicate delivery.

use super::workloads;
use crate::config::ProvisionConfig;
use crate::credentials::{
    self, KubeconfigBundle, SECRET_TYPE_KUBECONFIG, SECRET_TYPE_KUBE_SECRET, SERVER_CERT_SECRET,
};
use crate::crd::Tenant;
use crate::error::{OperatorError, Result};
use crate::store::{ignore_already_exists, ObjectStore};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Stage of the provisioning pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    Secret,
    Kubeconfig,
    ApiServer,
    ControllerManager,
}

impl ProvisionPhase {
    /// Execution order. Later phases depend on artifacts of earlier ones.
    pub const ORDERED: [ProvisionPhase; 4] = [
        ProvisionPhase::Secret,
        ProvisionPhase::Kubeconfig,
        ProvisionPhase::ApiServer,
        ProvisionPhase::ControllerManager,
    ];

    /// Condition reason recorded when this phase fails
    pub fn reason(&self) -> &'static str {
        match self {
            ProvisionPhase::Secret => "SecretFailed",
            ProvisionPhase::Kubeconfig => "KubeconfigFailed",
            ProvisionPhase::ApiServer => "ApiServerFailed",
            ProvisionPhase::ControllerManager => "ControllerManagerFailed",
        }
    }
}

impl std::fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvisionPhase::Secret => "secret",
            ProvisionPhase::Kubeconfig => "kubeconfig",
            ProvisionPhase::ApiServer => "apiserver",
            ProvisionPhase::ControllerManager => "controller-manager",
        };
        f.write_str(name)
    }
}

/// A phase failed; later phases were not attempted
#[derive(Debug, Error)]
#[error("{phase} phase failed: {source}")]
pub struct PhaseFailure {
    pub phase: ProvisionPhase,
    #[source]
    pub source: OperatorError,
}

/// Runs the phases for one tenant against the host store
pub struct Pipeline<'a> {
    store: &'a dyn ObjectStore,
    config: &'a ProvisionConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a ProvisionConfig) -> Self {
        Self { store, config }
    }

    /// Run every phase in order, stopping at the first failure.
    pub async fn run(&self, tenant: &Tenant) -> std::result::Result<(), PhaseFailure> {
        for phase in ProvisionPhase::ORDERED {
            debug!(tenant = %tenant.name_any(), phase = %phase, "running provisioning phase");
            self.run_phase(phase, tenant)
                .await
                .map_err(|source| PhaseFailure { phase, source })?;
        }
        info!(tenant = %tenant.name_any(), "control plane provisioned");
        Ok(())
    }

    async fn run_phase(&self, phase: ProvisionPhase, tenant: &Tenant) -> Result<()> {
        match phase {
            ProvisionPhase::Secret => self.reconcile_secret(tenant).await,
            ProvisionPhase::Kubeconfig => self.reconcile_kubeconfig(tenant).await,
            ProvisionPhase::ApiServer => self.reconcile_apiserver(tenant).await,
            ProvisionPhase::ControllerManager => self.reconcile_controller_manager(tenant).await,
        }
    }

    async fn reconcile_secret(&self, tenant: &Tenant) -> Result<()> {
        let namespace = tenant.control_plane_namespace();
        if self.store.get_secret(&namespace, SERVER_CERT_SECRET).await?.is_some() {
            return Ok(());
        }

        let data = credentials::build_server_cert_bundle(&tenant.name_any(), &self.config.etcd_seed)?;
        let secret = bundle_secret(tenant, SERVER_CERT_SECRET, SECRET_TYPE_KUBE_SECRET, data);
        ignore_already_exists(self.store.create_secret(&secret).await)?;
        info!(tenant = %tenant.name_any(), secret = SERVER_CERT_SECRET, "created certificate bundle");
        Ok(())
    }

    async fn reconcile_kubeconfig(&self, tenant: &Tenant) -> Result<()> {
        let namespace = tenant.control_plane_namespace();
        for bundle in KubeconfigBundle::ALL {
            if self.store.get_secret(&namespace, bundle.secret_name()).await?.is_some() {
                continue;
            }

            let server_cert = self.server_cert_data(&namespace).await?;
            let data = credentials::build_kubeconfig_bundle(&tenant.name_any(), bundle, &server_cert)?;
            let secret = bundle_secret(tenant, bundle.secret_name(), SECRET_TYPE_KUBECONFIG, data);
            ignore_already_exists(self.store.create_secret(&secret).await)?;
            info!(tenant = %tenant.name_any(), secret = bundle.secret_name(), "created kubeconfig");
        }
        Ok(())
    }

    async fn reconcile_apiserver(&self, tenant: &Tenant) -> Result<()> {
        let namespace = tenant.control_plane_namespace();

        if self
            .store
            .get_deployment(&namespace, workloads::APISERVER_NAME)
            .await?
            .is_none()
        {
            let deployment = workloads::apiserver_deployment(tenant, self.config);
            ignore_already_exists(self.store.create_deployment(&deployment).await)?;
            info!(tenant = %tenant.name_any(), "created kube-apiserver deployment");
        }

        if self
            .store
            .get_service(&namespace, workloads::APISERVER_NAME)
            .await?
            .is_none()
        {
            let service = workloads::apiserver_service(tenant);
            ignore_already_exists(self.store.create_service(&service).await)?;
            info!(tenant = %tenant.name_any(), "created kube-apiserver service");
        }
        Ok(())
    }

    async fn reconcile_controller_manager(&self, tenant: &Tenant) -> Result<()> {
        let namespace = tenant.control_plane_namespace();
        if self
            .store
            .get_deployment(&namespace, workloads::CONTROLLER_MANAGER_NAME)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let deployment = workloads::controller_manager_deployment(tenant, self.config);
        ignore_already_exists(self.store.create_deployment(&deployment).await)?;
        info!(tenant = %tenant.name_any(), "created kube-controller-manager deployment");
        Ok(())
    }

    /// Read the `server-cert` payload; never synthesize it here.
    async fn server_cert_data(&self, namespace: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let secret = self
            .store
            .get_secret(namespace, SERVER_CERT_SECRET)
            .await?
            .ok_or_else(|| {
                OperatorError::MissingDependency(format!(
                    "secret {}/{} not found",
                    namespace, SERVER_CERT_SECRET
                ))
            })?;
        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect())
    }
}

fn bundle_secret(
    tenant: &Tenant,
    name: &str,
    secret_type: &str,
    data: BTreeMap<String, Vec<u8>>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(tenant.control_plane_namespace()),
            labels: Some(workloads::common_labels(tenant, name)),
            owner_references: Some(vec![workloads::owner_reference(tenant)]),
            ..Default::default()
        },
        type_: Some(secret_type.to_string()),
        data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TenantSpec;
    use crate::store::{MemoryStore, MockObjectStore};

    fn tenant() -> Tenant {
        let mut tenant = Tenant::new("t1", TenantSpec::default());
        tenant.metadata.uid = Some("uid-t1".to_string());
        tenant
    }

    fn config() -> ProvisionConfig {
        let mut seed = BTreeMap::new();
        seed.insert("etcd-ca.crt".to_string(), b"etcd-ca".to_vec());
        ProvisionConfig {
            etcd_servers: vec!["https://etcd:2379".into()],
            etcd_seed: seed,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_order_and_reasons() {
        assert_eq!(
            ProvisionPhase::ORDERED,
            [
                ProvisionPhase::Secret,
                ProvisionPhase::Kubeconfig,
                ProvisionPhase::ApiServer,
                ProvisionPhase::ControllerManager
            ]
        );
        assert_eq!(ProvisionPhase::Kubeconfig.reason(), "KubeconfigFailed");
        assert_eq!(ProvisionPhase::ControllerManager.to_string(), "controller-manager");
    }

    #[tokio::test]
    async fn test_pipeline_creates_every_artifact() {
        let store = MemoryStore::new();
        let config = config();
        Pipeline::new(&store, &config).run(&tenant()).await.unwrap();

        let server_cert = store.secret("t1", "server-cert").unwrap();
        assert_eq!(server_cert.type_.as_deref(), Some("kcp/kube-secret"));
        let data = server_cert.data.as_ref().unwrap();
        assert_eq!(data["etcd-ca.crt"].0, b"etcd-ca".to_vec());
        assert!(data.contains_key("sa.pub"));

        let owner = &server_cert.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.uid, "uid-t1");

        let admin = store.secret("t1", "kubeconfig-admin").unwrap();
        assert_eq!(admin.type_.as_deref(), Some("kcp/kubeconfig"));
        assert!(admin.data.as_ref().unwrap().contains_key("admin.conf"));
        assert!(store.secret("t1", "kubeconfig-controller-manager").is_some());

        assert!(store.has_deployment("t1", "kube-apiserver"));
        assert!(store.has_service("t1", "kube-apiserver"));
        assert!(store.has_deployment("t1", "kube-controller-manager"));
        assert_eq!(store.create_count(), 6);
    }

    #[tokio::test]
    async fn test_pipeline_rerun_creates_nothing() {
        let store = MemoryStore::new();
        let config = config();
        let pipeline = Pipeline::new(&store, &config);
        pipeline.run(&tenant()).await.unwrap();
        let first = store.secret("t1", "server-cert").unwrap();

        let creates = store.create_count();
        pipeline.run(&tenant()).await.unwrap();
        assert_eq!(store.create_count(), creates);
        assert_eq!(store.secret("t1", "server-cert").unwrap().data, first.data);
    }

    #[tokio::test]
    async fn test_pipeline_resumes_after_partial_run() {
        let store = MemoryStore::new();
        let config = config();
        let pipeline = Pipeline::new(&store, &config);
        pipeline.run(&tenant()).await.unwrap();

        store.remove_deployment("t1", "kube-controller-manager");
        let creates = store.create_count();
        pipeline.run(&tenant()).await.unwrap();
        assert_eq!(store.create_count(), creates + 1);
    }

    #[tokio::test]
    async fn test_kubeconfig_phase_requires_server_cert() {
        let store = MemoryStore::new();
        let config = config();
        let pipeline = Pipeline::new(&store, &config);

        let err = pipeline
            .run_phase(ProvisionPhase::Kubeconfig, &tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::MissingDependency(_)));
        assert!(store.secret("t1", "kubeconfig-admin").is_none());
    }

    #[tokio::test]
    async fn test_kubeconfig_phase_rejects_malformed_server_cert() {
        let store = MemoryStore::new();
        let config = config();
        let mut data = BTreeMap::new();
        data.insert("ca.crt".to_string(), b"not pem".to_vec());
        data.insert("ca.key".to_string(), b"not pem".to_vec());
        store.put_secret(bundle_secret(&tenant(), SERVER_CERT_SECRET, SECRET_TYPE_KUBE_SECRET, data));

        let failure = Pipeline::new(&store, &config).run(&tenant()).await.unwrap_err();
        assert_eq!(failure.phase, ProvisionPhase::Kubeconfig);
        assert!(failure.source.is_contract_violation());
        assert!(!store.has_deployment("t1", "kube-apiserver"));
    }

    #[tokio::test]
    async fn test_lost_create_race_is_success() {
        let mut store = MockObjectStore::new();
        store.expect_get_secret().returning(|_, _| Ok(None));
        store
            .expect_create_secret()
            .times(1)
            .returning(|_| Err(OperatorError::AlreadyExists("server-cert".into())));

        let config = config();
        let pipeline = Pipeline::new(&store, &config);
        assert!(pipeline.run_phase(ProvisionPhase::Secret, &tenant()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_store_error_stops_pipeline() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_secret()
            .returning(|_, _| Err(OperatorError::KubeApi("connection refused".into())));
        store.expect_create_secret().never();
        store.expect_create_deployment().never();

        let config = config();
        let failure = Pipeline::new(&store, &config).run(&tenant()).await.unwrap_err();
        assert_eq!(failure.phase, ProvisionPhase::Secret);
        assert!(failure.source.is_transient());
    }
}
