//! InstallPlan State Machine (D) — spec §4.4. Drives `status.phase` and, for
//! `Installing`, calls the Step Executor (E) one step at a time in strict order
//! (spec §5 "Ordering guarantees").

pub mod executor;
pub mod safe_upgrade;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::error::Error;
use crate::types::{
    ApprovalMode, ClusterServiceVersion, InstallPlan, InstallPlanCondition, InstallPlanStatus, Phase,
    Step, StepStatus,
};

const FIELD_MANAGER: &str = "olm-core";

/// Per-namespace "current InstallPlan in Installing" marker (spec §9 "Global
/// mutable state"): held only across enter/exit, never across an await that does I/O.
type InstallingMarker = Arc<Mutex<HashMap<String, String>>>;

#[derive(Clone)]
struct Ctx {
    client: Client,
    installing: InstallingMarker,
    step_retry_deadline: Duration,
}

pub async fn run(client: Client, watch_namespace: &str, step_retry_deadline: Duration) -> anyhow::Result<()> {
    let api: Api<InstallPlan> = match watch_namespace {
        "" => Api::all(client.clone()),
        ns => Api::namespaced(client.clone(), ns),
    };
    let ctx = Arc::new(Ctx {
        client,
        installing: Arc::new(Mutex::new(HashMap::new())),
        step_retry_deadline,
    });

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((objref, _)) => info!(installplan = %objref.name, "reconciled"),
                Err(e) => error!(error = %e, "installplan reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(plan, ctx), fields(name = %plan.name_any(), namespace = %plan.namespace().unwrap_or_default()))]
async fn reconcile(plan: Arc<InstallPlan>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let name = plan.name_any();
    let namespace = plan.namespace().unwrap_or_default();
    let api: Api<InstallPlan> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut status = plan.status.clone().unwrap_or_default();

    match status.phase {
        Phase::Planning => {
            status.phase = match plan.spec.approval {
                ApprovalMode::Manual => Phase::RequiresApproval,
                ApprovalMode::Automatic => Phase::Installing,
            };
            patch_status(&api, &name, &status).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }

        Phase::RequiresApproval => {
            if plan.spec.approved {
                status.phase = Phase::Installing;
                patch_status(&api, &name, &status).await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            } else {
                // Persistent state, not a suspended coroutine (spec §9 "Approval
                // gate"): zero writes until `spec.approved` flips.
                Ok(Action::await_change())
            }
        }

        Phase::Installing => advance_installing(&plan, &name, &namespace, &api, ctx.as_ref()).await,

        Phase::Complete | Phase::Failed => Ok(Action::await_change()),
    }
}

async fn advance_installing(
    plan: &InstallPlan,
    name: &str,
    namespace: &str,
    api: &Api<InstallPlan>,
    ctx: &Ctx,
) -> Result<Action, Error> {
    if !claim_installing_slot(&ctx.installing, namespace, name) {
        // Another InstallPlan in this namespace is mid-install; try again shortly
        // (spec §4.4 "one InstallPlan per namespace may be in Installing at a time").
        return Ok(Action::requeue(Duration::from_secs(2)));
    }
    let result = advance_installing_locked(plan, name, namespace, api, ctx).await;
    release_installing_slot(&ctx.installing, namespace, name);
    result
}

async fn advance_installing_locked(
    plan: &InstallPlan,
    name: &str,
    namespace: &str,
    api: &Api<InstallPlan>,
    ctx: &Ctx,
) -> Result<Action, Error> {
    let client = &ctx.client;
    let mut status = plan.status.clone().unwrap_or_default();

    let Some(next) = status.plan.iter().position(|s| s.status != StepStatus::Created) else {
        status.phase = Phase::Complete;
        patch_status(api, name, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(30)));
    };

    let kind = status.plan[next].resource.kind.clone();
    let owner = if matches!(kind.as_str(), "ClusterServiceVersion" | "CustomResourceDefinition" | "Subscription") {
        // These handlers don't use an owner ref: the CSV step is itself the unit,
        // CRDs are cluster-scoped, and synthesized Subscriptions stand alone.
        k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference::default()
    } else {
        match owning_csv_name(&status.plan, next) {
            Some(csv_name) => resolve_owner(client, namespace, &csv_name).await?,
            None => return Err(Error::Other(format!("step {next} has no owning CSV in {name}"))),
        }
    };

    let mut step = status.plan[next].clone();
    let first_attempted_at = step
        .first_attempted_at
        .get_or_insert_with(|| chrono::Utc::now().to_rfc3339())
        .clone();

    match executor::execute_step(client, &mut step, namespace, &owner).await {
        Ok(()) => {
            status.plan[next] = step;
            if status.plan.iter().all(|s| s.status == StepStatus::Created) {
                status.phase = Phase::Complete;
            }
            patch_status(api, name, &status).await?;
            Ok(Action::requeue(Duration::from_millis(500)))
        }
        Err(e) if e.is_transient() && !deadline_exceeded(&first_attempted_at, ctx.step_retry_deadline) => {
            warn!(step = next, error = %e, "transient step error, retrying");
            status.plan[next] = step;
            patch_status(api, name, &status).await?;
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        Err(e) if e.is_transient() => {
            // Deadline blown on an error that would otherwise be retried forever
            // (spec §5 "each step has an overall deadline of 60 seconds").
            let deadline_err = Error::StepDeadlineExceeded(format!("step {next} ({kind}): {e}"));
            status.plan[next] = step;
            status.phase = Phase::Failed;
            status.conditions.push(InstallPlanCondition {
                type_: "Installed".to_string(),
                status: "False".to_string(),
                reason: Some(failure_reason(&deadline_err)),
                message: Some(deadline_err.to_string()),
            });
            patch_status(api, name, &status).await?;
            Ok(Action::await_change())
        }
        Err(e) => {
            status.plan[next] = step;
            status.phase = Phase::Failed;
            status.conditions.push(InstallPlanCondition {
                type_: "Installed".to_string(),
                status: "False".to_string(),
                reason: Some(failure_reason(&e)),
                message: Some(e.to_string()),
            });
            patch_status(api, name, &status).await?;
            Ok(Action::await_change())
        }
    }
}

/// True once `first_attempted_at` is further in the past than `deadline` (spec §5).
/// An unparseable timestamp is treated as not-yet-expired rather than failing the
/// step outright — a malformed stamp shouldn't itself become a fatal condition.
fn deadline_exceeded(first_attempted_at: &str, deadline: Duration) -> bool {
    let Ok(first) = chrono::DateTime::parse_from_rfc3339(first_attempted_at) else {
        return false;
    };
    let elapsed = chrono::Utc::now().signed_duration_since(first.with_timezone(&chrono::Utc));
    elapsed.to_std().map(|e| e >= deadline).unwrap_or(false)
}

fn failure_reason(e: &Error) -> String {
    match e {
        Error::CrdUpgradeWouldCauseDataLoss { .. } => "CRDUpgradeWouldCauseDataLoss".to_string(),
        Error::OwnerConflict { .. } => "OwnerConflict".to_string(),
        Error::DependencyConflict(_) => "DependencyConflict".to_string(),
        Error::StepDeadlineExceeded(_) => "StepDeadlineExceeded".to_string(),
        _ => "InstallComponentFailed".to_string(),
    }
}

/// Finds the name of the CSV whose resolver-emitted block (spec §4.3 step 5: owned
/// CRDs, the CSV, then its RBAC) contains step `idx` — the nearest preceding CSV
/// step, or if none, the nearest following one (covers CRD steps, which the
/// resolver emits ahead of their own CSV's step).
fn owning_csv_name(steps: &[Step], idx: usize) -> Option<String> {
    steps[..idx]
        .iter()
        .rev()
        .find(|s| s.resource.kind == "ClusterServiceVersion")
        .or_else(|| {
            steps[idx..]
                .iter()
                .find(|s| s.resource.kind == "ClusterServiceVersion")
        })
        .map(|s| s.resource.name.clone())
}

async fn resolve_owner(
    client: &Client,
    namespace: &str,
    csv_name: &str,
) -> Result<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference, Error> {
    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), namespace);
    let csv = api.get(csv_name).await?;
    let uid = csv.metadata.uid.clone().unwrap_or_default();
    Ok(crate::resources::owner_reference(csv_name, &uid))
}

fn claim_installing_slot(marker: &InstallingMarker, namespace: &str, name: &str) -> bool {
    let mut map = marker.lock().expect("installing marker lock poisoned");
    match map.get(namespace) {
        Some(holder) if holder != name => false,
        _ => {
            map.insert(namespace.to_string(), name.to_string());
            true
        }
    }
}

fn release_installing_slot(marker: &InstallingMarker, namespace: &str, name: &str) {
    let mut map = marker.lock().expect("installing marker lock poisoned");
    if map.get(namespace).map(String::as_str) == Some(name) {
        map.remove(namespace);
    }
}

async fn patch_status(api: &Api<InstallPlan>, name: &str, status: &InstallPlanStatus) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await?;
    Ok(())
}

fn error_policy(_plan: Arc<InstallPlan>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "installplan reconcile error");
    Action::requeue(Duration::from_secs(10))
}
