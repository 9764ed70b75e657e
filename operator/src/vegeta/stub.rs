//! Helper methods only available for tests
use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use kube::{error::ErrorResponse, ResourceExt};

use crate::{
    utils::OwnerIndex,
    vegeta::{pod::Role, store::UnitStore, Vegeta, VegetaSpec, VegetaStatus},
};

pub const NAMESPACE: &str = "perf";
pub const NAME: &str = "load";

// Add tests specific implementation to the Vegeta
impl Vegeta {
    /// A normal test load test
    pub fn test() -> Self {
        let mut vegeta = Vegeta::new(NAME, VegetaSpec::default());
        vegeta.metadata.namespace = Some(NAMESPACE.to_owned());
        vegeta.metadata.uid = Some("a7f2c3e1".to_owned());
        vegeta
    }
    /// Modify a load test to have an expected spec
    pub fn with_spec(self, spec: VegetaSpec) -> Self {
        Self { spec, ..self }
    }
    /// Modify a load test to have an expected status
    pub fn with_status(self, status: VegetaStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}

fn api_error(reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message,
        reason: reason.to_owned(),
        code: 409,
    })
}

#[derive(Default)]
struct State {
    requests: BTreeMap<(String, String), Vegeta>,
    units: BTreeMap<(String, String), Pod>,
    version: u64,
    status_writes: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In memory store behaving like the API server for the calls the controller makes.
///
/// Every call yields before touching the state, so concurrent reconciles interleave and
/// observe each other's writes the way they would against a real API server.
#[derive(Default)]
pub struct FakeStore {
    index: OwnerIndex,
    state: Mutex<State>,
}

impl FakeStore {
    /// Store holding a single load test.
    pub fn with_request(vegeta: Vegeta) -> Self {
        let store = Self::default();
        store.put_request(vegeta);
        store
    }

    /// Create or overwrite a load test, bumping its resource version.
    pub fn put_request(&self, mut vegeta: Vegeta) {
        let mut state = self.state.lock().expect("should be able to acquire lock");
        vegeta.metadata.resource_version = Some(state.next_version());
        let key = (vegeta.namespace().unwrap_or_default(), vegeta.name_any());
        state.requests.insert(key, vegeta);
    }

    /// Remove a load test. Pods are left behind, garbage collection is not simulated.
    pub fn delete_request(&self, ns: &str, name: &str) {
        let mut state = self.state.lock().expect("should be able to acquire lock");
        state.requests.remove(&(ns.to_owned(), name.to_owned()));
    }

    /// Current state of a load test.
    pub fn request(&self, ns: &str, name: &str) -> Option<Vegeta> {
        let state = self.state.lock().expect("should be able to acquire lock");
        state
            .requests
            .get(&(ns.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Current status of the default test load test.
    pub fn status(&self) -> VegetaStatus {
        self.request(NAMESPACE, NAME)
            .and_then(|vegeta| vegeta.status)
            .unwrap_or_default()
    }

    /// Add a pod as if created by someone else.
    pub fn put_unit(&self, pod: Pod) {
        let mut state = self.state.lock().expect("should be able to acquire lock");
        let key = (pod.namespace().unwrap_or_default(), pod.name_any());
        state.units.insert(key, pod);
    }

    /// Names of all pods with the given role, sorted.
    pub fn unit_names(&self, role: Role) -> Vec<String> {
        let state = self.state.lock().expect("should be able to acquire lock");
        state
            .units
            .values()
            .filter(|pod| Role::of(pod) == Some(role))
            .map(|pod| pod.name_any())
            .collect()
    }

    /// Report a phase for a pod, as the kubelet would.
    pub fn set_unit_phase(&self, name: &str, phase: &str) {
        let mut state = self.state.lock().expect("should be able to acquire lock");
        let pod = state
            .units
            .get_mut(&(NAMESPACE.to_owned(), name.to_owned()))
            .expect("pod should exist");
        pod.status = Some(PodStatus {
            phase: Some(phase.to_owned()),
            ..Default::default()
        });
    }

    /// Number of successful status writes.
    pub fn status_writes(&self) -> usize {
        self.state
            .lock()
            .expect("should be able to acquire lock")
            .status_writes
    }
}

#[async_trait]
impl UnitStore for FakeStore {
    async fn get_request(&self, ns: &str, name: &str) -> Result<Option<Vegeta>, kube::Error> {
        tokio::task::yield_now().await;
        Ok(self.request(ns, name))
    }

    async fn list_units(&self, vegeta: &Vegeta) -> Result<Vec<Pod>, kube::Error> {
        tokio::task::yield_now().await;
        let state = self.state.lock().expect("should be able to acquire lock");
        Ok(state
            .units
            .values()
            .filter(|pod| self.index.owns(vegeta, pod))
            .cloned()
            .collect())
    }

    async fn get_unit(&self, ns: &str, name: &str) -> Result<Option<Pod>, kube::Error> {
        tokio::task::yield_now().await;
        let state = self.state.lock().expect("should be able to acquire lock");
        Ok(state.units.get(&(ns.to_owned(), name.to_owned())).cloned())
    }

    async fn create_unit(&self, ns: &str, pod: &Pod) -> Result<Pod, kube::Error> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().expect("should be able to acquire lock");
        let key = (ns.to_owned(), pod.name_any());
        if state.units.contains_key(&key) {
            return Err(api_error(
                "AlreadyExists",
                format!("pods \"{}\" already exists", key.1),
            ));
        }
        let mut pod = pod.clone();
        pod.metadata.resource_version = Some(state.next_version());
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_owned()),
            ..Default::default()
        });
        state.units.insert(key, pod.clone());
        Ok(pod)
    }

    async fn replace_status(&self, vegeta: &Vegeta) -> Result<Vegeta, kube::Error> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().expect("should be able to acquire lock");
        let key = (vegeta.namespace().unwrap_or_default(), vegeta.name_any());
        let Some(current) = state.requests.get(&key).cloned() else {
            return Err(kube::Error::Api(ErrorResponse {
                status: "Failure".to_owned(),
                message: format!("vegeta \"{}\" not found", key.1),
                reason: "NotFound".to_owned(),
                code: 404,
            }));
        };
        if current.metadata.resource_version != vegeta.metadata.resource_version {
            return Err(api_error(
                "Conflict",
                "the object has been modified".to_owned(),
            ));
        }
        // Only the status subresource is written, spec changes are ignored.
        let mut updated = current;
        updated.status = vegeta.status.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.status_writes += 1;
        state.requests.insert(key, updated.clone());
        Ok(updated)
    }
}
