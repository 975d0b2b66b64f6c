//! In-memory [`ObjectStore`] for reconcile scenario tests

use super::ObjectStore;
use crate::crd::Tenant;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

type Key = (String, String);

#[derive(Default)]
struct State {
    tenants: BTreeMap<String, Tenant>,
    namespaces: BTreeSet<String>,
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    creates: usize,
}

/// Host store kept in a mutex-guarded map
///
/// Simulates the API server's finalizer gate: a deleting tenant vanishes once
/// its last finalizer is persisted away.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: kube::Resource>(obj: &K) -> Key {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(tenant: Tenant) -> Self {
        let store = Self::new();
        store.put_tenant(tenant);
        store
    }

    pub fn put_tenant(&self, mut tenant: Tenant) {
        if tenant.metadata.uid.is_none() {
            tenant.metadata.uid = Some(format!("uid-{}", tenant.name_any()));
        }
        self.state
            .lock()
            .unwrap()
            .tenants
            .insert(tenant.name_any(), tenant);
    }

    pub fn tenant(&self, name: &str) -> Option<Tenant> {
        self.state.lock().unwrap().tenants.get(name).cloned()
    }

    /// Set the deletion marker, as `kubectl delete` would.
    pub fn mark_deleting(&self, name: &str) {
        if let Some(tenant) = self.state.lock().unwrap().tenants.get_mut(name) {
            tenant.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains(name)
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state.lock().unwrap().secrets.get(&key(namespace, name)).cloned()
    }

    pub fn put_secret(&self, secret: Secret) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(object_key(&secret), secret);
    }

    pub fn has_deployment(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .deployments
            .contains_key(&key(namespace, name))
    }

    pub fn has_service(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .services
            .contains_key(&key(namespace, name))
    }

    pub fn remove_deployment(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .deployments
            .remove(&key(namespace, name));
    }

    /// Report observed replica counts for a deployment.
    pub fn set_deployment_replicas(&self, namespace: &str, name: &str, replicas: i32, ready: i32) {
        if let Some(deployment) = self
            .state
            .lock()
            .unwrap()
            .deployments
            .get_mut(&key(namespace, name))
        {
            deployment.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(ready),
                ..Default::default()
            });
        }
    }
}

fn insert_new<T: Clone>(map: &mut BTreeMap<Key, T>, key: Key, obj: &T) -> Result<()> {
    if map.contains_key(&key) {
        return Err(OperatorError::AlreadyExists(format!("{}/{}", key.0, key.1)));
    }
    map.insert(key, obj.clone());
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        Ok(self.tenant(name))
    }

    async fn persist_tenant(&self, tenant: &Tenant) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = tenant.name_any();
        let Some(stored) = state.tenants.get_mut(&name) else {
            return Ok(());
        };

        stored.metadata.finalizers = tenant.metadata.finalizers.clone();
        stored.metadata.owner_references = tenant.metadata.owner_references.clone();
        stored.status = tenant.status.clone();

        if stored.is_deleting() && stored.finalizers().is_empty() {
            state.tenants.remove(&name);
        }
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.has_namespace(name).then(|| Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.insert(name.to_string()) {
            return Err(OperatorError::AlreadyExists(name.to_string()));
        }
        state.creates += 1;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.secrets, object_key(secret), secret)?;
        state.creates += 1;
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .deployments
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.deployments, object_key(deployment), deployment)?;
        state.creates += 1;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.services, object_key(service), service)?;
        state.creates += 1;
        Ok(())
    }
}
