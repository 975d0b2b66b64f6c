//! Tenant Controller
//!
//! Reconciles Tenant custom resources: finalizer bookkeeping, deletion,
//! provisioning of the hosted control plane and readiness tracking. The
//! phase is recomputed from conditions and persisted at the end of every
//! pass, whichever way the pass ends.

use super::provisioning::Pipeline;
use super::readiness;
use super::Controller;
use crate::conditions::{self, TENANT_CONDITION_PROVISIONED, TENANT_FINALIZER};
use crate::config::ProvisionConfig;
use crate::crd::{Tenant, TenantPhase};
use crate::error::{OperatorError, Result};
use crate::store::{ignore_already_exists, ObjectStore};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller as KubeController};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=tenant-operator";

/// Reconcile logic for a single tenant, independent of how passes are triggered
pub struct TenantReconciler {
    store: Arc<dyn ObjectStore>,
    config: ProvisionConfig,
}

impl TenantReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, config: ProvisionConfig) -> Self {
        Self { store, config }
    }

    /// One reconcile pass for the tenant called `name`.
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        let Some(mut tenant) = self.store.get_tenant(name).await? else {
            debug!(tenant = %name, "tenant not found, nothing to do");
            return Ok(Action::await_change());
        };

        info!(tenant = %name, phase = %tenant.phase(), "reconciling tenant");

        // Finalizer goes on before any artifact exists.
        if !tenant.has_finalizer(TENANT_FINALIZER) {
            if tenant.is_deleting() {
                return Ok(Action::await_change());
            }
            tenant.add_finalizer(TENANT_FINALIZER);
            return self.finish(tenant, Ok(Action::await_change())).await;
        }

        let outcome = if tenant.is_deleting() {
            self.reconcile_delete(&mut tenant)
        } else {
            self.reconcile_normal(&mut tenant).await
        };
        self.finish(tenant, outcome).await
    }

    /// Deletion is always honored. The first pass makes `Terminating`
    /// durable; the next one releases the finalizer. Owned objects are left
    /// to the host garbage collector.
    fn reconcile_delete(&self, tenant: &mut Tenant) -> Result<Action> {
        if tenant.phase() != TenantPhase::Terminating {
            info!(tenant = %tenant.name_any(), "tenant is terminating");
            return Ok(Action::requeue(Duration::ZERO));
        }

        tenant.remove_finalizer(TENANT_FINALIZER);
        info!(tenant = %tenant.name_any(), "released tenant finalizer");
        Ok(Action::await_change())
    }

    async fn reconcile_normal(&self, tenant: &mut Tenant) -> Result<Action> {
        let namespace = tenant.control_plane_namespace();
        self.ensure_namespace(&namespace).await?;

        let current = tenant.conditions();
        if !conditions::has(current, TENANT_CONDITION_PROVISIONED)
            || conditions::is_false(current, TENANT_CONDITION_PROVISIONED)
        {
            let pipeline = Pipeline::new(self.store.as_ref(), &self.config);
            if let Err(failure) = pipeline.run(tenant).await {
                error!(
                    tenant = %tenant.name_any(),
                    phase = %failure.phase,
                    error = %failure.source,
                    "provisioning failed"
                );
                if !failure.source.is_transient() {
                    conditions::mark_false(
                        tenant.conditions_mut(),
                        TENANT_CONDITION_PROVISIONED,
                        failure.phase.reason(),
                        &failure.source.to_string(),
                    );
                }
                return Err(failure.source);
            }
            conditions::mark_true(
                tenant.conditions_mut(),
                TENANT_CONDITION_PROVISIONED,
                "Success",
                "Success to provision",
            );
        }

        let readiness = readiness::probe(self.store.as_ref(), &namespace).await?;
        if readiness::apply(&tenant.name_any(), &readiness, tenant.conditions_mut()) {
            return Ok(Action::requeue(self.config.readiness_requeue));
        }
        Ok(Action::await_change())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        if self.store.get_namespace(name).await?.is_some() {
            return Ok(());
        }
        ignore_already_exists(self.store.create_namespace(name).await)?;
        info!(namespace = %name, "created control-plane namespace");
        Ok(())
    }

    /// Project the phase, persist, and merge a persist failure into the
    /// pass outcome.
    async fn finish(&self, mut tenant: Tenant, outcome: Result<Action>) -> Result<Action> {
        let deleting = tenant.is_deleting();
        let status = tenant.status.get_or_insert_with(Default::default);
        status.phase = TenantPhase::project(&status.conditions, deleting);

        let persisted = self.store.persist_tenant(&tenant).await;
        if let Err(e) = &persisted {
            error!(tenant = %tenant.name_any(), error = %e, "unable to persist tenant");
        }

        let (action, pass_error) = match outcome {
            Ok(action) => (Some(action), None),
            Err(e) => (None, Some(e)),
        };
        let errors = pass_error.into_iter().chain(persisted.err()).collect();
        match OperatorError::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(action.unwrap_or_else(Action::await_change)),
        }
    }
}

/// Requeue delay after a failed pass
pub fn error_policy(tenant: Arc<Tenant>, error: &OperatorError, _ctx: Arc<TenantReconciler>) -> Action {
    if error.is_transient() {
        warn!(tenant = %tenant.name_any(), error = %error, "transient reconciliation error");
    } else {
        error!(tenant = %tenant.name_any(), error = %error, "reconciliation error");
    }
    Action::requeue(Duration::from_secs(30))
}

/// Watches Tenants and drives [`TenantReconciler`] with bounded concurrency
pub struct TenantController {
    client: Client,
    reconciler: Arc<TenantReconciler>,
    concurrency: u16,
}

impl TenantController {
    pub fn new(client: Client, reconciler: TenantReconciler, concurrency: u16) -> Self {
        Self {
            client,
            reconciler: Arc::new(reconciler),
            concurrency,
        }
    }
}

#[async_trait::async_trait]
impl Controller for TenantController {
    async fn run(&self) -> Result<()> {
        let tenants: Api<Tenant> = Api::all(self.client.clone());
        let deployments: Api<Deployment> = Api::all(self.client.clone());

        info!(concurrency = self.concurrency, "Starting Tenant controller");

        KubeController::new(tenants, Config::default())
            .watches(
                deployments,
                Config::default().labels(MANAGED_BY_SELECTOR),
                |deployment| {
                    deployment
                        .labels()
                        .get("tenant")
                        .map(|name| ObjectRef::<Tenant>::new(name))
                },
            )
            .with_config(controller::Config::default().concurrency(self.concurrency))
            .shutdown_on_signal()
            .run(
                |tenant, ctx| async move { ctx.reconcile(&tenant.name_any()).await },
                error_policy,
                Arc::clone(&self.reconciler),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled tenant: {}", obj.name);
                    }
                    Err(e) => {
                        debug!("Reconcile stream error: {:?}", e);
                    }
                }
            })
            .await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "tenant"
    }
}
