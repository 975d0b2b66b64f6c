//! [`ObjectStore`] backed by the Kubernetes API server

use super::ObjectStore;
use crate::crd::Tenant;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

const FIELD_MANAGER: &str = "tenant-operator";

/// Store talking to the host cluster through a shared kube client
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn create<K>(api: Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), obj).await?;
    debug!(name = %obj.name_any(), "created object");
    Ok(())
}

fn object_namespace<K: Resource>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or_else(|| OperatorError::InvalidState(format!("{} has no namespace", obj.name_any())))
}

/// NotFound means the tenant went away mid-pass; nothing left to persist.
fn tolerate_gone<T>(result: std::result::Result<T, kube::Error>) -> Result<Option<T>> {
    match result.map_err(OperatorError::from) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>> {
        get_opt(Api::all(self.client.clone()), name).await
    }

    async fn persist_tenant(&self, tenant: &Tenant) -> Result<()> {
        let tenants: Api<Tenant> = Api::all(self.client.clone());
        let name = tenant.name_any();

        if tenants.get_opt(&name).await?.is_none() {
            return Ok(());
        }

        // Status first: releasing the last finalizer may delete the object.
        let status_patch = json!({ "status": tenant.status });
        let Some(updated) = tolerate_gone(
            tenants
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&status_patch))
                .await,
        )?
        else {
            return Ok(());
        };

        let metadata_patch = json!({
            "metadata": {
                "resourceVersion": updated.resource_version(),
                "finalizers": tenant.finalizers(),
                "ownerReferences": tenant.owner_references(),
            }
        });
        tolerate_gone(
            tenants
                .patch(&name, &PatchParams::default(), &Patch::Merge(&metadata_patch))
                .await,
        )?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        get_opt(Api::all(self.client.clone()), name).await
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    [("app.kubernetes.io/managed-by".to_string(), FIELD_MANAGER.to_string())]
                        .into(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        create(Api::all(self.client.clone()), &namespace).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        get_opt(self.namespaced(namespace), name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        create(self.namespaced(&object_namespace(secret)?), secret).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        get_opt(self.namespaced(namespace), name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        create(self.namespaced(&object_namespace(deployment)?), deployment).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        get_opt(self.namespaced(namespace), name).await
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        create(self.namespaced(&object_namespace(service)?), service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{self, TENANT_CONDITION_PROVISIONED, TENANT_FINALIZER};
    use crate::crd::TenantSpec;
    use http::{Method, Request, Response};
    use kube::client::Body;
    use serde_json::Value;
    use std::time::Duration;

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    const TENANT_PATH: &str = "/apis/tenancy.kcp.io/v1alpha1/tenants/t1";

    fn mock_store() -> (KubeStore, ApiServerHandle) {
        let (service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (KubeStore::new(Client::new(service, "default")), handle)
    }

    fn stored_tenant(resource_version: &str) -> Tenant {
        let mut tenant = Tenant::new("t1", TenantSpec::default());
        tenant.metadata.resource_version = Some(resource_version.to_string());
        tenant.metadata.labels = Some([("team".to_string(), "a".to_string())].into());
        tenant
    }

    fn desired_tenant() -> Tenant {
        let mut tenant = stored_tenant("1");
        tenant.add_finalizer(TENANT_FINALIZER);
        conditions::mark_true(
            tenant.conditions_mut(),
            TENANT_CONDITION_PROVISIONED,
            "Success",
            "Success to provision",
        );
        tenant
    }

    fn ok(tenant: &Tenant) -> Response<Body> {
        Response::builder()
            .body(Body::from(serde_json::to_vec(tenant).unwrap()))
            .unwrap()
    }

    fn not_found() -> Response<Body> {
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "tenants.tenancy.kcp.io \"t1\" not found",
            "reason": "NotFound",
            "code": 404
        });
        Response::builder()
            .status(404)
            .body(Body::from(serde_json::to_vec(&status).unwrap()))
            .unwrap()
    }

    /// Answer the next request and return its JSON body, if any.
    async fn expect_request(
        handle: &mut ApiServerHandle,
        method: Method,
        path: &str,
        response: Response<Body>,
    ) -> Option<Value> {
        let (request, send) = handle.next_request().await.expect("service not called");
        assert_eq!(request.method(), method);
        assert_eq!(request.uri().path(), path);
        let body = request.into_body().collect_bytes().await.unwrap();
        send.send_response(response);
        (!body.is_empty()).then(|| serde_json::from_slice(&body).expect("request body is json"))
    }

    async fn timeout_after_1s<T>(handle: tokio::task::JoinHandle<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    fn sorted_keys(value: &Value) -> Vec<String> {
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_persist_tenant_patches_status_then_metadata() {
        let (store, mut handle) = mock_store();
        let status_path = format!("{}/status", TENANT_PATH);
        let verifier = tokio::spawn(async move {
            expect_request(&mut handle, Method::GET, TENANT_PATH, ok(&stored_tenant("1"))).await;
            let status =
                expect_request(&mut handle, Method::PATCH, &status_path, ok(&stored_tenant("2")))
                    .await
                    .unwrap();
            let metadata =
                expect_request(&mut handle, Method::PATCH, TENANT_PATH, ok(&stored_tenant("3")))
                    .await
                    .unwrap();
            (status, metadata)
        });

        store.persist_tenant(&desired_tenant()).await.unwrap();
        let (status, metadata) = timeout_after_1s(verifier).await;

        assert_eq!(sorted_keys(&status), vec!["status"]);
        assert_eq!(status["status"]["conditions"][0]["type"], "Provisioned");
        assert_eq!(status["status"]["conditions"][0]["status"], "True");

        assert_eq!(sorted_keys(&metadata), vec!["metadata"]);
        assert_eq!(
            sorted_keys(&metadata["metadata"]),
            vec!["finalizers", "ownerReferences", "resourceVersion"]
        );
        assert_eq!(metadata["metadata"]["resourceVersion"], "2");
        assert_eq!(metadata["metadata"]["finalizers"], json!([TENANT_FINALIZER]));
        assert_eq!(metadata["metadata"]["ownerReferences"], json!([]));
    }

    #[tokio::test]
    async fn test_persist_tenant_skips_absent_tenant() {
        let (store, mut handle) = mock_store();
        let verifier = tokio::spawn(async move {
            expect_request(&mut handle, Method::GET, TENANT_PATH, not_found()).await;
        });

        store.persist_tenant(&desired_tenant()).await.unwrap();
        timeout_after_1s(verifier).await;
    }

    #[tokio::test]
    async fn test_persist_tenant_tolerates_gone_on_status_patch() {
        let (store, mut handle) = mock_store();
        let status_path = format!("{}/status", TENANT_PATH);
        let verifier = tokio::spawn(async move {
            expect_request(&mut handle, Method::GET, TENANT_PATH, ok(&stored_tenant("1"))).await;
            expect_request(&mut handle, Method::PATCH, &status_path, not_found()).await;
        });

        store.persist_tenant(&desired_tenant()).await.unwrap();
        timeout_after_1s(verifier).await;
    }

    #[tokio::test]
    async fn test_persist_tenant_tolerates_gone_on_metadata_patch() {
        let (store, mut handle) = mock_store();
        let status_path = format!("{}/status", TENANT_PATH);
        let verifier = tokio::spawn(async move {
            expect_request(&mut handle, Method::GET, TENANT_PATH, ok(&stored_tenant("1"))).await;
            expect_request(&mut handle, Method::PATCH, &status_path, ok(&stored_tenant("2"))).await;
            expect_request(&mut handle, Method::PATCH, TENANT_PATH, not_found()).await;
        });

        store.persist_tenant(&desired_tenant()).await.unwrap();
        timeout_after_1s(verifier).await;
    }
}
