//! Utils is shared types and functions for the controller
#[cfg(test)]
pub mod test;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::{runtime::reflector::ObjectRef, Resource, ResourceExt};

use crate::{labels::INSTANCE_LABEL, vegeta::Vegeta};

/// Image used by pods of load tests that do not override it.
pub const DEFAULT_IMAGE: &str = "vegeta:latest";
/// Pull policy of the pods of all load tests.
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "Always";

/// Operator Context
pub struct Context<S> {
    /// Store of load tests and their pods
    pub store: S,
    /// Operator wide configuration
    pub config: ControllerConfig,
}

impl<S> Context<S> {
    /// Create new context
    pub fn new(store: S, config: ControllerConfig) -> Self {
        Self { store, config }
    }
}

/// Operator wide configuration, fixed at startup.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Image of pods whose load test does not set one.
    pub image: String,
    /// Pull policy of every pod.
    pub image_pull_policy: String,
    /// Labels added to every pod.
    pub labels: BTreeMap<String, String>,
    /// How pods are mapped back to their load test.
    pub owner_index: OwnerIndex,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            image_pull_policy: DEFAULT_IMAGE_PULL_POLICY.to_owned(),
            labels: BTreeMap::new(),
            owner_index: OwnerIndex::default(),
        }
    }
}

/// Maps pods back to the load test that owns them.
///
/// Pods are listed by `label`, which holds the name of the load test, and only pods whose
/// controller reference points to a resource of `api_version` and `kind` are kept.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerIndex {
    /// Label holding the name of the owning load test.
    pub label: String,
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self {
            label: INSTANCE_LABEL.to_owned(),
            api_version: Vegeta::api_version(&()).into_owned(),
            kind: Vegeta::kind(&()).into_owned(),
        }
    }
}

impl OwnerIndex {
    /// Label selector matching the candidate pods of a load test.
    pub fn selector(&self, name: &str) -> String {
        format!("{}={name}", self.label)
    }

    /// Name of the load test controlling the pod, if any.
    pub fn owner_of(&self, pod: &Pod) -> Option<String> {
        pod.owner_references()
            .iter()
            .find(|oref| {
                oref.controller == Some(true)
                    && oref.api_version == self.api_version
                    && oref.kind == self.kind
            })
            .map(|oref| oref.name.clone())
    }

    /// Reference to the load test controlling the pod, used to trigger its reconciliation
    /// when the pod changes.
    pub fn request_ref(&self, pod: &Pod) -> Option<ObjectRef<Vegeta>> {
        let name = self.owner_of(pod)?;
        let ns = pod.namespace()?;
        Some(ObjectRef::new(&name).within(&ns))
    }

    /// Reports whether the pod is controlled by the given load test.
    pub fn owns(&self, vegeta: &Vegeta, pod: &Pod) -> bool {
        self.owner_of(pod).as_deref() == vegeta.meta().name.as_deref()
            && pod.namespace() == vegeta.namespace()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::vegeta::VegetaSpec;

    fn pod(ns: &str, orefs: Vec<OwnerReference>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("load-attack-0".to_owned()),
                namespace: Some(ns.to_owned()),
                owner_references: Some(orefs),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn oref(api_version: &str, kind: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: api_version.to_owned(),
            kind: kind.to_owned(),
            name: "load".to_owned(),
            uid: "a7f2c3e1".to_owned(),
            controller,
            ..Default::default()
        }
    }

    #[test]
    fn default_index() {
        let index = OwnerIndex::default();
        assert_eq!(index.api_version, "vegeta.testing.io/v1alpha1");
        assert_eq!(index.kind, "Vegeta");
        assert_eq!(index.selector("load"), "app.kubernetes.io/instance=load");
    }

    #[test]
    fn owner_requires_controller_reference() {
        let index = OwnerIndex::default();
        let owned = pod(
            "perf",
            vec![oref("vegeta.testing.io/v1alpha1", "Vegeta", Some(true))],
        );
        assert_eq!(index.owner_of(&owned).as_deref(), Some("load"));
        assert_eq!(
            index.request_ref(&owned),
            Some(ObjectRef::new("load").within("perf"))
        );

        let not_controller = pod(
            "perf",
            vec![oref("vegeta.testing.io/v1alpha1", "Vegeta", None)],
        );
        assert_eq!(index.owner_of(&not_controller), None);

        let other_kind = pod("perf", vec![oref("batch/v1", "Job", Some(true))]);
        assert_eq!(index.request_ref(&other_kind), None);
    }

    #[test]
    fn owns_checks_namespace() {
        let index = OwnerIndex::default();
        let mut vegeta = Vegeta::new("load", VegetaSpec::default());
        vegeta.metadata.namespace = Some("perf".to_owned());
        let orefs = vec![oref("vegeta.testing.io/v1alpha1", "Vegeta", Some(true))];
        assert!(index.owns(&vegeta, &pod("perf", orefs.clone())));
        assert!(!index.owns(&vegeta, &pod("other", orefs)));
    }
}
