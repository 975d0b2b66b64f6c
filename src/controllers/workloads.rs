//! Hosted control-plane workload descriptors
//!
//! Builds the Deployments and Service that run a tenant's kube-apiserver and
//! kube-controller-manager. Objects are created once and never patched, so
//! these builders describe the initial shape only.

use crate::config::ProvisionConfig;
use crate::credentials::{KubeconfigBundle, APISERVER_PORT, SERVER_CERT_SECRET};
use crate::crd::Tenant;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, SecretVolumeSource,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub const APISERVER_NAME: &str = "kube-apiserver";
pub const CONTROLLER_MANAGER_NAME: &str = "kube-controller-manager";

/// Secure port of kube-controller-manager
const CONTROLLER_MANAGER_PORT: i32 = 10257;

const PKI_DIR: &str = "/etc/kubernetes/pki";
const KUBECONFIG_DIR: &str = "/etc/kubernetes/kubeconfig";
const KUBECONFIG_VOLUME: &str = "kubeconfig";
const SERVICE_ACCOUNT_ISSUER: &str = "https://kubernetes.default.svc.cluster.local";

/// Owner reference that lets the host garbage collector cascade tenant deletion
pub fn owner_reference(tenant: &Tenant) -> OwnerReference {
    OwnerReference {
        api_version: Tenant::api_version(&()).to_string(),
        kind: Tenant::kind(&()).to_string(),
        name: tenant.name_any(),
        uid: tenant.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn common_labels(tenant: &Tenant, component: &str) -> BTreeMap<String, String> {
    let mut labels = pod_selector(tenant, component);
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), tenant.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "tenant-operator".to_string(),
    );
    labels
}

fn pod_selector(tenant: &Tenant, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), component.to_string());
    labels.insert("tenant".to_string(), tenant.name_any());
    labels
}

fn object_meta(tenant: &Tenant, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(tenant.control_plane_namespace()),
        labels: Some(common_labels(tenant, name)),
        owner_references: Some(vec![owner_reference(tenant)]),
        ..Default::default()
    }
}

fn pki(path: &str) -> String {
    format!("{}/{}", PKI_DIR, path)
}

fn apiserver_command(tenant: &Tenant, config: &ProvisionConfig) -> Vec<String> {
    vec![
        "kube-apiserver".to_string(),
        "--advertise-address=0.0.0.0".to_string(),
        "--allow-privileged=true".to_string(),
        "--authorization-mode=Node,RBAC".to_string(),
        format!("--client-ca-file={}", pki("ca.crt")),
        "--enable-admission-plugins=NodeRestriction".to_string(),
        "--enable-bootstrap-token-auth=true".to_string(),
        format!("--etcd-cafile={}", pki("etcd-ca.crt")),
        format!("--etcd-certfile={}", pki("apiserver-etcd-client.crt")),
        format!("--etcd-keyfile={}", pki("apiserver-etcd-client.key")),
        format!("--etcd-servers={}", config.etcd_servers_arg()),
        format!("--etcd-prefix=/{}/registry", tenant.name_any()),
        format!("--kubelet-client-certificate={}", pki("apiserver-kubelet-client.crt")),
        format!("--kubelet-client-key={}", pki("apiserver-kubelet-client.key")),
        "--kubelet-preferred-address-types=InternalIP,ExternalIP,Hostname".to_string(),
        format!("--proxy-client-cert-file={}", pki("front-proxy-client.crt")),
        format!("--proxy-client-key-file={}", pki("front-proxy-client.key")),
        "--requestheader-allowed-names=front-proxy-client".to_string(),
        format!("--requestheader-client-ca-file={}", pki("front-proxy-ca.crt")),
        "--requestheader-extra-headers-prefix=X-Remote-Extra-".to_string(),
        "--requestheader-group-headers=X-Remote-Group".to_string(),
        "--requestheader-username-headers=X-Remote-User".to_string(),
        format!("--secure-port={}", APISERVER_PORT),
        format!("--service-account-issuer={}", SERVICE_ACCOUNT_ISSUER),
        format!("--service-account-key-file={}", pki("sa.pub")),
        format!("--service-account-signing-key-file={}", pki("sa.key")),
        format!("--service-cluster-ip-range={}", config.service_cluster_ip_range),
        format!("--tls-cert-file={}", pki("apiserver.crt")),
        format!("--tls-private-key-file={}", pki("apiserver.key")),
    ]
}

fn controller_manager_command(config: &ProvisionConfig) -> Vec<String> {
    let kubeconfig = format!(
        "{}/{}",
        KUBECONFIG_DIR,
        KubeconfigBundle::ControllerManager.data_key()
    );
    vec![
        "kube-controller-manager".to_string(),
        "--allocate-node-cidrs=true".to_string(),
        format!("--authentication-kubeconfig={}", kubeconfig),
        format!("--authorization-kubeconfig={}", kubeconfig),
        "--bind-address=0.0.0.0".to_string(),
        format!("--client-ca-file={}", pki("ca.crt")),
        format!("--cluster-cidr={}", config.cluster_cidr),
        format!("--cluster-signing-cert-file={}", pki("ca.crt")),
        format!("--cluster-signing-key-file={}", pki("ca.key")),
        "--controllers=*,bootstrapsigner,tokencleaner".to_string(),
        format!("--kubeconfig={}", kubeconfig),
        "--leader-elect=true".to_string(),
        "--node-cidr-mask-size=24".to_string(),
        format!("--requestheader-client-ca-file={}", pki("front-proxy-ca.crt")),
        format!("--root-ca-file={}", pki("ca.crt")),
        format!("--service-account-private-key-file={}", pki("sa.key")),
        "--use-service-account-credentials=true".to_string(),
    ]
}

fn https_probe(path: &str, port: i32) -> HTTPGetAction {
    HTTPGetAction {
        host: Some("127.0.0.1".to_string()),
        path: Some(path.to_string()),
        port: IntOrString::Int(port),
        scheme: Some("HTTPS".to_string()),
        ..Default::default()
    }
}

fn liveness_probe(port: i32) -> Probe {
    Probe {
        http_get: Some(https_probe("/livez", port)),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(15),
        success_threshold: Some(1),
        failure_threshold: Some(8),
        ..Default::default()
    }
}

fn readiness_probe(port: i32) -> Probe {
    Probe {
        http_get: Some(https_probe("/readyz", port)),
        period_seconds: Some(1),
        timeout_seconds: Some(15),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn startup_probe(port: i32) -> Probe {
    Probe {
        http_get: Some(https_probe("/livez", port)),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(15),
        success_threshold: Some(1),
        failure_threshold: Some(24),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn deployment(tenant: &Tenant, name: &str, container: Container, volumes: Vec<Volume>) -> Deployment {
    let selector = pod_selector(tenant, name);
    Deployment {
        metadata: object_meta(tenant, name),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn apiserver_deployment(tenant: &Tenant, config: &ProvisionConfig) -> Deployment {
    let container = Container {
        name: "apiserver".to_string(),
        image: Some(config.apiserver_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(apiserver_command(tenant, config)),
        ports: Some(vec![ContainerPort {
            name: Some("https".to_string()),
            container_port: APISERVER_PORT,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![read_only_mount(SERVER_CERT_SECRET, PKI_DIR)]),
        liveness_probe: Some(liveness_probe(APISERVER_PORT)),
        readiness_probe: Some(readiness_probe(APISERVER_PORT)),
        startup_probe: Some(startup_probe(APISERVER_PORT)),
        ..Default::default()
    };
    deployment(
        tenant,
        APISERVER_NAME,
        container,
        vec![secret_volume(SERVER_CERT_SECRET, SERVER_CERT_SECRET)],
    )
}

pub fn apiserver_service(tenant: &Tenant) -> Service {
    Service {
        metadata: object_meta(tenant, APISERVER_NAME),
        spec: Some(ServiceSpec {
            selector: Some(pod_selector(tenant, APISERVER_NAME)),
            ports: Some(vec![ServicePort {
                name: Some("https".to_string()),
                protocol: Some("TCP".to_string()),
                port: APISERVER_PORT,
                target_port: Some(IntOrString::Int(APISERVER_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn controller_manager_deployment(tenant: &Tenant, config: &ProvisionConfig) -> Deployment {
    let container = Container {
        name: "controller-manager".to_string(),
        image: Some(config.controller_manager_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(controller_manager_command(config)),
        volume_mounts: Some(vec![
            read_only_mount(SERVER_CERT_SECRET, PKI_DIR),
            read_only_mount(KUBECONFIG_VOLUME, KUBECONFIG_DIR),
        ]),
        liveness_probe: Some(liveness_probe(CONTROLLER_MANAGER_PORT)),
        startup_probe: Some(startup_probe(CONTROLLER_MANAGER_PORT)),
        ..Default::default()
    };
    deployment(
        tenant,
        CONTROLLER_MANAGER_NAME,
        container,
        vec![
            secret_volume(SERVER_CERT_SECRET, SERVER_CERT_SECRET),
            secret_volume(
                KUBECONFIG_VOLUME,
                KubeconfigBundle::ControllerManager.secret_name(),
            ),
        ],
    )
}
