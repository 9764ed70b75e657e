//! Classifies attack pods and derives the status of a load test from them.
use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::vegeta::{pod::Role, Phase, VegetaStatus};

/// Terminal state of a pod as reported by the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    /// Anything that is not terminal, including pods without a reported phase.
    Active,
    /// Terminated without error.
    Succeeded,
    /// Terminated with an error.
    Failed,
}

impl UnitPhase {
    /// Terminal state of the given pod.
    pub fn of(pod: &Pod) -> Self {
        match pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
        {
            Some("Succeeded") => UnitPhase::Succeeded,
            Some("Failed") => UnitPhase::Failed,
            _ => UnitPhase::Active,
        }
    }
}

/// Attack pods partitioned by terminal state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Observed {
    pub active: BTreeSet<String>,
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeSet<String>,
}

impl Observed {
    /// Partition the attack pods among the given pods. Report pods are ignored.
    pub fn from_units(units: &[Pod]) -> Self {
        let mut observed = Self::default();
        for unit in units
            .iter()
            .filter(|unit| Role::of(unit) != Some(Role::Report))
        {
            let set = match UnitPhase::of(unit) {
                UnitPhase::Active => &mut observed.active,
                UnitPhase::Succeeded => &mut observed.succeeded,
                UnitPhase::Failed => &mut observed.failed,
            };
            set.insert(unit.name_any());
        }
        observed
    }

    /// Reports whether the persisted status lists the same pods, ignoring order.
    pub fn matches(&self, status: &VegetaStatus) -> bool {
        fn same(observed: &BTreeSet<String>, persisted: &[String]) -> bool {
            observed.len() == persisted.len()
                && persisted.iter().collect::<BTreeSet<_>>() == observed.iter().collect::<BTreeSet<_>>()
        }
        same(&self.active, &status.active)
            && same(&self.succeeded, &status.succeeded)
            && same(&self.failed, &status.failed)
    }

    /// Phase following `current` given the observed pods. Final phases never change.
    pub fn next_phase(&self, current: Phase) -> Phase {
        if current.is_final() {
            current
        } else if !self.failed.is_empty() {
            Phase::Failed
        } else if !self.active.is_empty() {
            Phase::Running
        } else {
            Phase::Succeeded
        }
    }

    /// Status listing the observed pods in name order with the next phase.
    pub fn into_status(self, current: Phase) -> VegetaStatus {
        let phase = self.next_phase(current);
        VegetaStatus {
            active: self.active.into_iter().collect(),
            succeeded: self.succeeded.into_iter().collect(),
            failed: self.failed.into_iter().collect(),
            phase,
        }
    }
}
