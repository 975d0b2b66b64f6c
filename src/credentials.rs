//! Credential bundles stored as tenant secrets
//!
//! Builds the `server-cert` bundle (both CAs, every leaf and the
//! service-account key pair) and the kubeconfig bundles derived from its
//! server CA. Payloads are plain `key -> PEM bytes` maps; wrapping them into
//! Secrets is left to the provisioning pipeline.

use crate::error::{OperatorError, Result};
use crate::kubeconfig;
use crate::pki::{self, AltNames, CertConfig, ExtKeyUsage, TrustDomain};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

pub const SERVER_CERT_SECRET: &str = "server-cert";
pub const SECRET_TYPE_KUBE_SECRET: &str = "kcp/kube-secret";
pub const SECRET_TYPE_KUBECONFIG: &str = "kcp/kubeconfig";

pub const APISERVER_PORT: i32 = 6443;

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";

const MASTERS_GROUP: &str = "system:masters";

/// In-cluster endpoint of a tenant's API server
pub fn apiserver_endpoint(tenant: &str) -> String {
    format!("https://kube-apiserver.{}.svc:{}", tenant, APISERVER_PORT)
}

/// Generate the complete `server-cert` payload for a tenant.
///
/// Seed entries are copied first so generated artifacts win on key collision.
pub fn build_server_cert_bundle(
    tenant: &str,
    seed: &BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let (server_ca, server_ca_key) = pki::new_ca(TrustDomain::Server, &AltNames::default())?;

    let apiserver = CertConfig::new("kube-apiserver", &[ExtKeyUsage::ServerAuth]).with_alt_names(
        AltNames {
            dns_names: vec![format!("kube-apiserver.{}.svc", tenant), "localhost".to_string()],
            ips: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        },
    );
    let (apiserver_cert, apiserver_key) =
        pki::new_cert_and_key(&server_ca, &server_ca_key, &apiserver)?;

    let kubelet_client = CertConfig::new("kube-apiserver-kubelet-client", &[ExtKeyUsage::ClientAuth])
        .with_organization(MASTERS_GROUP);
    let (kubelet_cert, kubelet_key) =
        pki::new_cert_and_key(&server_ca, &server_ca_key, &kubelet_client)?;

    let (front_ca, front_ca_key) = pki::new_ca(
        TrustDomain::FrontProxy,
        &AltNames {
            dns_names: vec!["front-proxy-ca".to_string()],
            ips: vec![],
        },
    )?;
    let front_client = CertConfig::new("front-proxy-client", &[ExtKeyUsage::ClientAuth]);
    let (front_cert, front_key) = pki::new_cert_and_key(&front_ca, &front_ca_key, &front_client)?;

    let (sa_pub, sa_key) = pki::new_pub_and_key()?;

    let mut data = seed.clone();
    insert_pair(&mut data, "ca", &server_ca, &server_ca_key)?;
    insert_pair(&mut data, "apiserver", &apiserver_cert, &apiserver_key)?;
    insert_pair(&mut data, "apiserver-kubelet-client", &kubelet_cert, &kubelet_key)?;
    insert_pair(&mut data, "front-proxy-ca", &front_ca, &front_ca_key)?;
    insert_pair(&mut data, "front-proxy-client", &front_cert, &front_key)?;
    data.insert("sa.pub".to_string(), pki::encode_public_key_pem(&sa_pub)?);
    data.insert("sa.key".to_string(), pki::encode_private_key_pem(&sa_key)?);
    Ok(data)
}

fn insert_pair(
    data: &mut BTreeMap<String, Vec<u8>>,
    name: &str,
    cert: &X509,
    key: &PKey<Private>,
) -> Result<()> {
    data.insert(format!("{}.crt", name), pki::encode_cert_pem(cert)?);
    data.insert(format!("{}.key", name), pki::encode_private_key_pem(key)?);
    Ok(())
}

/// Decode the server CA from a `server-cert` payload.
pub fn load_server_ca(data: &BTreeMap<String, Vec<u8>>) -> Result<(X509, PKey<Private>)> {
    let cert_pem = data.get(CA_CERT_KEY).ok_or_else(|| {
        OperatorError::MissingDependency(format!("{} is empty in {} secret", CA_CERT_KEY, SERVER_CERT_SECRET))
    })?;
    let key_pem = data.get(CA_KEY_KEY).ok_or_else(|| {
        OperatorError::MissingDependency(format!("{} is empty in {} secret", CA_KEY_KEY, SERVER_CERT_SECRET))
    })?;
    Ok((pki::decode_cert_pem(cert_pem)?, pki::decode_private_key_pem(key_pem)?))
}

/// Client kubeconfigs issued from the server CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeconfigBundle {
    Admin,
    ControllerManager,
}

impl KubeconfigBundle {
    pub const ALL: [KubeconfigBundle; 2] = [KubeconfigBundle::Admin, KubeconfigBundle::ControllerManager];

    pub fn secret_name(&self) -> &'static str {
        match self {
            KubeconfigBundle::Admin => "kubeconfig-admin",
            KubeconfigBundle::ControllerManager => "kubeconfig-controller-manager",
        }
    }

    pub fn data_key(&self) -> &'static str {
        match self {
            KubeconfigBundle::Admin => "admin.conf",
            KubeconfigBundle::ControllerManager => "controller-manager.conf",
        }
    }

    pub fn identity(&self) -> CertConfig {
        match self {
            KubeconfigBundle::Admin => CertConfig::new("kubernetes-admin", &[ExtKeyUsage::ClientAuth])
                .with_organization(MASTERS_GROUP),
            KubeconfigBundle::ControllerManager => {
                CertConfig::new("system:kube-controller-manager", &[ExtKeyUsage::ClientAuth])
            }
        }
    }
}

/// Build a kubeconfig bundle payload from the tenant's `server-cert` data.
pub fn build_kubeconfig_bundle(
    tenant: &str,
    bundle: KubeconfigBundle,
    server_cert: &BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let (ca_cert, ca_key) = load_server_ca(server_cert)?;
    let config = kubeconfig::new_with_secret(
        tenant,
        &apiserver_endpoint(tenant),
        &ca_cert,
        &ca_key,
        &bundle.identity(),
    )?;

    let mut data = BTreeMap::new();
    data.insert(bundle.data_key().to_string(), config.to_yaml()?);
    Ok(data)
}
