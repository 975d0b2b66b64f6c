//! Kubeconfig assembly for hosted control planes
//!
//! Every kubeconfig holds exactly one cluster, one context and one user. The
//! cluster is named after the tenant, the user after the client identity, and
//! the context `<user>@<cluster>`, so repeated assemblies for the same inputs
//! differ only in key material.

use crate::error::{OperatorError, Result};
use crate::pki::{self, CertConfig};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::X509Ref;
use serde::{Deserialize, Serialize};

/// Serialized form of a client kubeconfig
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub users: Vec<NamedUser>,
    pub current_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,
    /// Base64 of the CA certificate PEM
    pub certificate_authority_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamedUser {
    pub name: String,
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct AuthInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Issue a client certificate for `leaf` and wrap it in a kubeconfig.
pub fn new_with_secret(
    tenant: &str,
    endpoint: &str,
    ca_cert: &X509Ref,
    ca_key: &PKeyRef<Private>,
    leaf: &CertConfig,
) -> Result<Kubeconfig> {
    let (cert, key) = pki::new_cert_and_key(ca_cert, ca_key, leaf)?;

    let auth = AuthInfo {
        client_certificate_data: Some(STANDARD.encode(pki::encode_cert_pem(&cert)?)),
        client_key_data: Some(STANDARD.encode(pki::encode_private_key_pem(&key)?)),
        token: None,
    };
    Kubeconfig::single(tenant, endpoint, ca_cert, &leaf.common_name, auth)
}

/// Bearer-token kubeconfig for `user`.
pub fn new_with_token(
    tenant: &str,
    endpoint: &str,
    ca_cert: &X509Ref,
    user: &str,
    token: &str,
) -> Result<Kubeconfig> {
    if token.is_empty() {
        return Err(OperatorError::InvalidState(format!(
            "empty bearer token for user {}",
            user
        )));
    }
    let auth = AuthInfo {
        token: Some(token.to_string()),
        ..Default::default()
    };
    Kubeconfig::single(tenant, endpoint, ca_cert, user, auth)
}

impl Kubeconfig {
    fn single(
        cluster: &str,
        endpoint: &str,
        ca_cert: &X509Ref,
        user: &str,
        auth: AuthInfo,
    ) -> Result<Self> {
        let context = context_name(user, cluster);
        Ok(Kubeconfig {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: cluster.to_string(),
                cluster: Cluster {
                    server: endpoint.to_string(),
                    certificate_authority_data: STANDARD.encode(pki::encode_cert_pem(ca_cert)?),
                },
            }],
            contexts: vec![NamedContext {
                name: context.clone(),
                context: Context {
                    cluster: cluster.to_string(),
                    user: user.to_string(),
                },
            }],
            users: vec![NamedUser {
                name: user.to_string(),
                user: auth,
            }],
            current_context: context,
        })
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }

    /// Decoded CA certificate PEM of the current cluster.
    pub fn certificate_authority(&self) -> Result<Vec<u8>> {
        let cluster = self
            .clusters
            .first()
            .ok_or_else(|| OperatorError::InvalidState("kubeconfig has no cluster".to_string()))?;
        STANDARD
            .decode(&cluster.cluster.certificate_authority_data)
            .map_err(|e| OperatorError::Serialization(e.to_string()))
    }
}

pub fn context_name(user: &str, cluster: &str) -> String {
    format!("{}@{}", user, cluster)
}
