//! Operator configuration
//!
//! Validated command-line options become a [`ProvisionConfig`], built once at
//! startup and shared by every reconcile.

use crate::error::{OperatorError, Result};
use crate::store::ObjectStore;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONCURRENCY: u16 = 10;
pub const DEFAULT_APISERVER_IMAGE: &str = "k8s.gcr.io/kube-apiserver:v1.23.4";
pub const DEFAULT_CONTROLLER_MANAGER_IMAGE: &str = "k8s.gcr.io/kube-controller-manager:v1.23.4";
pub const DEFAULT_SERVICE_CLUSTER_IP_RANGE: &str = "10.101.0.0/16";
pub const DEFAULT_CLUSTER_CIDR: &str = "10.100.0.0/16";

/// Delay before re-checking workloads that are not ready yet
pub const READINESS_REQUEUE: Duration = Duration::from_secs(10);

const DEFAULT_SECRET_NAMESPACE: &str = "default";

/// Reference to a secret as `[namespace/]name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (namespace, name) = match value.split_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => (DEFAULT_SECRET_NAMESPACE, value),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(OperatorError::Configuration(format!(
                "invalid secret reference {:?}, expected [namespace/]name",
                value
            )));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Parameters shared by every tenant's control plane
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub etcd_servers: Vec<String>,
    /// Copied verbatim into every `server-cert` bundle
    pub etcd_seed: BTreeMap<String, Vec<u8>>,
    pub apiserver_image: String,
    pub controller_manager_image: String,
    pub service_cluster_ip_range: String,
    pub cluster_cidr: String,
    pub readiness_requeue: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            etcd_servers: Vec::new(),
            etcd_seed: BTreeMap::new(),
            apiserver_image: DEFAULT_APISERVER_IMAGE.to_string(),
            controller_manager_image: DEFAULT_CONTROLLER_MANAGER_IMAGE.to_string(),
            service_cluster_ip_range: DEFAULT_SERVICE_CLUSTER_IP_RANGE.to_string(),
            cluster_cidr: DEFAULT_CLUSTER_CIDR.to_string(),
            readiness_requeue: READINESS_REQUEUE,
        }
    }
}

impl ProvisionConfig {
    /// Comma-separated list as passed to `--etcd-servers`
    pub fn etcd_servers_arg(&self) -> String {
        self.etcd_servers.join(",")
    }

    pub fn validate(&self) -> Result<()> {
        if self.etcd_servers.is_empty() {
            return Err(OperatorError::Configuration(
                "etcd servers must not be empty".to_string(),
            ));
        }
        if self.apiserver_image.is_empty() || self.controller_manager_image.is_empty() {
            return Err(OperatorError::Configuration(
                "control-plane images must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma-separated server list, dropping blanks.
pub fn parse_servers(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load the etcd seed secret. Its absence is a startup error.
pub async fn load_seed(store: &dyn ObjectStore, reference: &SecretRef) -> Result<BTreeMap<String, Vec<u8>>> {
    let secret = store
        .get_secret(&reference.namespace, &reference.name)
        .await?
        .ok_or_else(|| OperatorError::Configuration(format!("etcd secret {} not found", reference)))?;

    let data: BTreeMap<String, Vec<u8>> = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect();
    info!(secret = %reference, keys = data.len(), "loaded etcd seed secret");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    #[test]
    fn test_secret_ref_parse() {
        assert_eq!(
            SecretRef::parse("kube-system/etcd-certs").unwrap(),
            SecretRef {
                namespace: "kube-system".into(),
                name: "etcd-certs".into()
            }
        );
        assert_eq!(SecretRef::parse("etcd-certs").unwrap().namespace, "default");
        assert!(SecretRef::parse("").is_err());
        assert!(SecretRef::parse("ns/").is_err());
        assert!(SecretRef::parse("a/b/c").is_err());
    }

    #[test]
    fn test_parse_servers() {
        assert_eq!(
            parse_servers("https://etcd-0:2379, https://etcd-1:2379,,"),
            vec!["https://etcd-0:2379", "https://etcd-1:2379"]
        );
        assert!(parse_servers("").is_empty());
    }

    #[test]
    fn test_validate() {
        let mut config = ProvisionConfig::default();
        assert!(config.validate().is_err());

        config.etcd_servers = vec!["https://etcd:2379".into()];
        assert!(config.validate().is_ok());
        assert_eq!(config.readiness_requeue, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_load_seed() {
        let store = MemoryStore::new();
        let reference = SecretRef::parse("kube-system/etcd").unwrap();
        assert!(load_seed(&store, &reference).await.is_err());

        store.put_secret(Secret {
            metadata: ObjectMeta {
                name: Some("etcd".into()),
                namespace: Some("kube-system".into()),
                ..Default::default()
            },
            data: Some([("etcd-ca.crt".to_string(), ByteString(b"pem".to_vec()))].into()),
            ..Default::default()
        });
        let seed = load_seed(&store, &reference).await.unwrap();
        assert_eq!(seed["etcd-ca.crt"], b"pem".to_vec());
    }
}
