//! Tenant Control-Plane Operator
//!
//! Provisions a hosted kube-apiserver and kube-controller-manager for every
//! Tenant in the host cluster.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! tenant-operator --etcd-servers https://etcd-0:2379 --etcd-secret kube-system/etcd-certs
//!
//! # Print the Tenant CRD
//! tenant-operator --print-crd
//!
//! # Run with custom log level
//! RUST_LOG=debug tenant-operator ...
//! ```

use clap::Parser;
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tenant_operator::config::{self, ProvisionConfig, SecretRef};
use tenant_operator::{Controller, KubeStore, ObjectStore, Tenant, TenantController, TenantReconciler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tenant Control-Plane Operator
#[derive(Parser, Debug)]
#[command(name = "tenant-operator")]
#[command(version, about = "Kubernetes Operator provisioning hosted control planes per Tenant")]
struct Args {
    /// Comma-separated etcd endpoints shared by every hosted apiserver
    #[arg(long, env = "ETCD_SERVERS", default_value = "")]
    etcd_servers: String,

    /// Secret holding etcd client credentials, as [namespace/]name
    #[arg(long, env = "ETCD_SECRET", default_value = "")]
    etcd_secret: String,

    /// Maximum number of tenants reconciled in parallel
    #[arg(long, default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrency: u16,

    /// Image for the hosted kube-apiserver
    #[arg(long, default_value = config::DEFAULT_APISERVER_IMAGE)]
    apiserver_image: String,

    /// Image for the hosted kube-controller-manager
    #[arg(long, default_value = config::DEFAULT_CONTROLLER_MANAGER_IMAGE)]
    controller_manager_image: String,

    /// Service CIDR of hosted control planes
    #[arg(long, default_value = config::DEFAULT_SERVICE_CLUSTER_IP_RANGE)]
    service_cluster_ip_range: String,

    /// Pod CIDR of hosted control planes
    #[arg(long, default_value = config::DEFAULT_CLUSTER_CIDR)]
    cluster_cidr: String,

    /// Print the Tenant CRD as YAML and exit
    #[arg(long, default_value = "false")]
    print_crd: bool,
}

impl Args {
    fn validate(&self) -> anyhow::Result<SecretRef> {
        if self.concurrency == 0 {
            anyhow::bail!("--concurrency must be greater than 0");
        }
        if self.etcd_secret.trim().is_empty() {
            anyhow::bail!("--etcd-secret must not be empty");
        }
        Ok(SecretRef::parse(&self.etcd_secret)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&Tenant::crd())?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let etcd_secret = args.validate()?;
    let mut provision = ProvisionConfig {
        etcd_servers: config::parse_servers(&args.etcd_servers),
        apiserver_image: args.apiserver_image.clone(),
        controller_manager_image: args.controller_manager_image.clone(),
        service_cluster_ip_range: args.service_cluster_ip_range.clone(),
        cluster_cidr: args.cluster_cidr.clone(),
        ..Default::default()
    };
    provision.validate()?;

    info!("Starting Tenant Control-Plane Operator");
    info!("Etcd servers: {}", provision.etcd_servers_arg());

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    provision.etcd_seed = config::load_seed(store.as_ref(), &etcd_secret).await?;

    let controller = Arc::new(TenantController::new(
        client,
        TenantReconciler::new(store, provision),
        args.concurrency,
    ));

    let handle = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(e) = controller.run().await {
                error!("{} controller error: {}", controller.name(), e);
            }
        })
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = handle => {
            if let Err(e) = result {
                error!("{} controller task failed: {}", controller.name(), e);
            }
        }
    }

    info!("Tenant Operator shutting down");
    Ok(())
}
