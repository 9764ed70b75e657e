use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    client::Client,
    runtime::{
        controller::Action,
        watcher::{self, Config},
        Controller,
    },
    Api, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info, warn};

use crate::{
    labels::MANAGED_BY_LABEL_SELECTOR,
    utils::{Context, ControllerConfig},
    vegeta::{
        pod::{attack_pod, report_pod, Role},
        status::{Observed, UnitPhase},
        store::{is_already_exists, is_conflict, KubeUnitStore, UnitStore},
        Phase, Vegeta, VegetaStatus,
    },
};

/// Delay before observing pods that were just created.
pub const UNIT_CREATED_DELAY: Duration = Duration::from_secs(5);
/// Delay before observing the load test after its status changed.
pub const STATUS_CHANGED_DELAY: Duration = Duration::from_secs(1);
/// Delay before observing the report pod that was just created.
pub const REPORT_CREATED_DELAY: Duration = Duration::from_secs(2);
/// Delay between observations of a running report pod.
pub const REPORT_PENDING_DELAY: Duration = Duration::from_secs(5);

const CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(1);
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Result of a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the load test or one of its pods changes.
    Converged,
    /// Reconcile again after the delay.
    RequeueAfter(Duration),
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Converged => Action::await_change(),
            Outcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Handle errors during reconciliation.
fn on_error<S>(vegeta: Arc<Vegeta>, error: &Error, _context: Arc<Context<S>>) -> Action {
    match error {
        Error::Kube { source } if is_conflict(source) => {
            debug!(vegeta = vegeta.name_any(), "stale status, retrying");
            Action::requeue(CONFLICT_RETRY_DELAY)
        }
        _ => {
            warn!(vegeta = vegeta.name_any(), %error, "reconcile failed");
            Action::requeue(ERROR_RETRY_DELAY)
        }
    }
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid load test, or a pod name taken by something else.
    #[error("App error: {source}")]
    App {
        #[from]
        source: anyhow::Error,
    },
    /// Failed call to the API server.
    #[error("Kube error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
}

/// Start a controller for the Vegeta CRD in each namespace, or in all namespaces when none
/// is given.
pub async fn run(client: Client, config: ControllerConfig, namespaces: Vec<String>) {
    let store = KubeUnitStore::new(client.clone(), config.owner_index.clone());
    let context = Arc::new(Context::new(store, config));

    let scopes: Vec<(Api<Vegeta>, Api<Pod>)> = if namespaces.is_empty() {
        vec![(Api::all(client.clone()), Api::all(client.clone()))]
    } else {
        namespaces
            .iter()
            .map(|ns| {
                (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client.clone(), ns),
                )
            })
            .collect()
    };

    let controllers = scopes.into_iter().map(|(requests, pods)| {
        let index = context.config.owner_index.clone();
        Controller::new(requests, Config::default())
            .watches(
                pods,
                watcher::Config::default().labels(MANAGED_BY_LABEL_SELECTOR),
                move |pod| index.request_ref(&pod),
            )
            .shutdown_on_signal()
            .run(reconcile, on_error, context.clone())
            .for_each(|rec_res| async move {
                match rec_res {
                    Ok((vegeta, _)) => {
                        debug!(vegeta.name, "reconcile success");
                    }
                    Err(err) => {
                        error!(?err, "reconcile error")
                    }
                }
            })
    });
    futures::future::join_all(controllers).await;
}

/// Perform a reconcile pass for the Vegeta CRD
async fn reconcile<S: UnitStore>(
    vegeta: Arc<Vegeta>,
    cx: Arc<Context<S>>,
) -> Result<Action, Error> {
    let meter = global::meter("vegeta");
    let runs = meter
        .u64_counter("vegeta_reconcile_count")
        .with_description("Number of vegeta reconciles")
        .init();

    let result = match vegeta.namespace() {
        Some(ns) => reconcile_request(&ns, &vegeta.name_any(), &cx).await,
        None => Err(anyhow!("vegeta {} has no namespace", vegeta.name_any()).into()),
    };
    match result {
        Ok(outcome) => {
            runs.add(1, &[KeyValue::new("result", "ok")]);
            Ok(outcome.into())
        }
        Err(err) => {
            runs.add(1, &[KeyValue::new("result", "err")]);
            Err(err)
        }
    }
}

/// Converge the pods and status of a load test.
///
/// Every pass starts over from the stored state: the load test is read, its pods listed,
/// and at most one change is written before returning.
pub async fn reconcile_request<S: UnitStore>(
    ns: &str,
    name: &str,
    cx: &Context<S>,
) -> Result<Outcome, Error> {
    let Some(vegeta) = cx.store.get_request(ns, name).await? else {
        // Pods are garbage collected through their owner reference.
        debug!(ns, name, "vegeta not found");
        return Ok(Outcome::Converged);
    };
    let (reports, attacks): (Vec<Pod>, Vec<Pod>) = cx
        .store
        .list_units(&vegeta)
        .await?
        .into_iter()
        .partition(|pod| Role::of(pod) == Some(Role::Report));

    if scale_up(&vegeta, &attacks, cx).await? > 0 {
        return Ok(Outcome::RequeueAfter(UNIT_CREATED_DELAY));
    }

    let status = vegeta.status.clone().unwrap_or_default();
    let observed = Observed::from_units(&attacks);
    if !observed.matches(&status) {
        let next = observed.into_status(status.phase);
        debug!(
            name,
            active = next.active.len(),
            succeeded = next.succeeded.len(),
            failed = next.failed.len(),
            "attack pods changed"
        );
        write_status(cx, &vegeta, next).await?;
        return Ok(Outcome::RequeueAfter(STATUS_CHANGED_DELAY));
    }

    if status.phase != Phase::Succeeded {
        debug!(name, phase = ?status.phase, "nothing to do");
        return Ok(Outcome::Converged);
    }

    match reports.first() {
        None if !vegeta.spec.needs_report_pod() => {
            write_phase(cx, &vegeta, status, Phase::Completed).await?;
            Ok(Outcome::Converged)
        }
        None => {
            create_unit(cx, &vegeta, &report_pod(&vegeta, &cx.config), Role::Report).await?;
            Ok(Outcome::RequeueAfter(REPORT_CREATED_DELAY))
        }
        Some(report) => match UnitPhase::of(report) {
            UnitPhase::Failed => {
                warn!(name, report = report.name_any(), "report failed");
                write_phase(cx, &vegeta, status, Phase::Failed).await?;
                Ok(Outcome::Converged)
            }
            UnitPhase::Succeeded => {
                write_phase(cx, &vegeta, status, Phase::Completed).await?;
                Ok(Outcome::Converged)
            }
            UnitPhase::Active => Ok(Outcome::RequeueAfter(REPORT_PENDING_DELAY)),
        },
    }
}

/// Create the attack pods missing to reach the requested replicas. Returns the number of
/// pods created, including pods a concurrent pass created first.
async fn scale_up<S: UnitStore>(
    vegeta: &Vegeta,
    attacks: &[Pod],
    cx: &Context<S>,
) -> Result<usize, Error> {
    let missing = (vegeta.spec.replicas as usize).saturating_sub(attacks.len());
    if missing == 0 {
        return Ok(0);
    }
    let existing: BTreeSet<String> = attacks.iter().map(|pod| pod.name_any()).collect();
    let mut created = 0;
    for slot in 0..vegeta.spec.replicas {
        if created == missing {
            break;
        }
        let pod = attack_pod(vegeta, &cx.config, slot);
        if existing.contains(&pod.name_any()) {
            continue;
        }
        create_unit(cx, vegeta, &pod, Role::Attack).await?;
        created += 1;
    }
    Ok(created)
}

/// Create a pod of the load test. A pod with the same name only counts as created when the
/// load test controls it.
async fn create_unit<S: UnitStore>(
    cx: &Context<S>,
    vegeta: &Vegeta,
    pod: &Pod,
    role: Role,
) -> Result<(), Error> {
    let ns = vegeta.namespace().unwrap_or_default();
    let ns = ns.as_str();
    let name = pod.name_any();
    match cx.store.create_unit(ns, pod).await {
        Ok(_) => {
            let meter = global::meter("vegeta");
            let created = meter
                .u64_counter("vegeta_units_created")
                .with_description("Number of pods created for load tests")
                .init();
            created.add(1, &[KeyValue::new("role", role.as_str())]);
            info!(ns, pod = name, role = role.as_str(), "created pod");
            Ok(())
        }
        Err(err) if is_already_exists(&err) => match cx.store.get_unit(ns, &name).await? {
            Some(existing) if !cx.config.owner_index.owns(vegeta, &existing) => Err(anyhow!(
                "pod {ns}/{name} exists and is not controlled by vegeta {}",
                vegeta.name_any()
            )
            .into()),
            // Created by a concurrent pass, or already deleted and recreated next pass.
            _ => {
                debug!(ns, pod = name, "pod already exists");
                Ok(())
            }
        },
        Err(err) => Err(err.into()),
    }
}

async fn write_phase<S: UnitStore>(
    cx: &Context<S>,
    vegeta: &Vegeta,
    status: VegetaStatus,
    phase: Phase,
) -> Result<(), kube::Error> {
    write_status(cx, vegeta, VegetaStatus { phase, ..status }).await
}

async fn write_status<S: UnitStore>(
    cx: &Context<S>,
    vegeta: &Vegeta,
    status: VegetaStatus,
) -> Result<(), kube::Error> {
    let current = vegeta
        .status
        .as_ref()
        .map(|status| status.phase)
        .unwrap_or_default();
    if current != status.phase {
        info!(
            vegeta = vegeta.name_any(),
            from = ?current,
            to = ?status.phase,
            "phase changed"
        );
    }
    let mut updated = vegeta.clone();
    updated.status = Some(status);
    cx.store.replace_status(&updated).await?;
    Ok(())
}
