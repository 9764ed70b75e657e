//! Access to load tests and their pods.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};

use crate::{utils::OwnerIndex, vegeta::Vegeta};

/// Define the behavior we consume from the cluster.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Fetch a load test, `None` when it does not exist.
    async fn get_request(&self, ns: &str, name: &str) -> Result<Option<Vegeta>, kube::Error>;
    /// List the pods controlled by a load test.
    async fn list_units(&self, vegeta: &Vegeta) -> Result<Vec<Pod>, kube::Error>;
    /// Fetch a pod, `None` when it does not exist.
    async fn get_unit(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error>;
    /// Create a pod.
    async fn create_unit(&self, ns: &str, pod: &Pod) -> Result<Pod, kube::Error>;
    /// Replace the status of a load test.
    ///
    /// The write carries the resource version of `vegeta` and fails with a conflict when the
    /// load test changed since it was read.
    async fn replace_status(&self, vegeta: &Vegeta) -> Result<Vegeta, kube::Error>;
}

/// Store backed by the kube API server.
pub struct KubeUnitStore {
    client: Client,
    index: OwnerIndex,
}

impl KubeUnitStore {
    /// Create a store using the given client and owner index.
    pub fn new(client: Client, index: OwnerIndex) -> Self {
        Self { client, index }
    }
}

#[async_trait]
impl UnitStore for KubeUnitStore {
    async fn get_request(&self, ns: &str, name: &str) -> Result<Option<Vegeta>, kube::Error> {
        let requests: Api<Vegeta> = Api::namespaced(self.client.clone(), ns);
        requests.get_opt(name).await
    }

    async fn list_units(&self, vegeta: &Vegeta) -> Result<Vec<Pod>, kube::Error> {
        let ns = vegeta.namespace().unwrap_or_default();
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
        let params = ListParams::default().labels(&self.index.selector(&vegeta.name_any()));
        Ok(pods
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter(|pod| self.index.owns(vegeta, pod))
            .collect())
    }

    async fn get_unit(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        pods.get_opt(name).await
    }

    async fn create_unit(&self, ns: &str, pod: &Pod) -> Result<Pod, kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        pods.create(&PostParams::default(), pod).await
    }

    async fn replace_status(&self, vegeta: &Vegeta) -> Result<Vegeta, kube::Error> {
        let ns = vegeta.namespace().unwrap_or_default();
        let requests: Api<Vegeta> = Api::namespaced(self.client.clone(), &ns);
        let data = serde_json::to_vec(vegeta).map_err(kube::Error::SerdeError)?;
        requests
            .replace_status(&vegeta.name_any(), &PostParams::default(), data)
            .await
    }
}

/// Reports whether the API server refused a write because the object changed.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict")
}

/// Reports whether the API server refused a create because the object exists.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists")
}
