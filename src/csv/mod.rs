//! CSV Reconciler (F) — spec §4.6. Drives one `ClusterServiceVersion` through
//! `Pending → InstallReady → Installing → Succeeded → (Replacing → Deleting) |
//! Failed`, owning API-service cert lifecycle and deployment reconciliation.

pub mod adoption;
pub mod certs;
pub mod gc;
pub mod install;
pub mod requirements;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::cache::ClusterSnapshot;
use crate::config::Config;
use crate::error::Error;
use crate::resources::{owner_reference, FINALIZER};
use crate::types::{ClusterServiceVersion, ClusterServiceVersionStatus, CsvCondition, CsvPhase};

const FIELD_MANAGER: &str = "olm-core";
const CONTROLLER_NAME: &str = "olm-core-csv";

#[derive(Clone)]
struct Ctx {
    client: Client,
    default_bundle_unpack_timeout: Duration,
}

pub async fn run(client: Client, watch_namespace: &str, config: &Config) -> anyhow::Result<()> {
    let api: Api<ClusterServiceVersion> = match watch_namespace {
        "" => Api::all(client.clone()),
        ns => Api::namespaced(client.clone(), ns),
    };
    let ctx = Arc::new(Ctx {
        client,
        default_bundle_unpack_timeout: config.default_bundle_unpack_timeout,
    });

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((objref, _)) => info!(csv = %objref.name, "reconciled"),
                Err(e) => error!(error = %e, "csv reconcile failed"),
            }
        })
        .await;

    Ok(())
}

fn reporter() -> Reporter {
    Reporter {
        controller: CONTROLLER_NAME.to_string(),
        instance: std::env::var("CONTROLLER_POD_NAME").ok(),
    }
}

/// Emits a Kubernetes Event on the CSV (spec §6 "Events"). Failures to publish are
/// logged, not propagated — an event is observability, not correctness.
async fn emit(client: &Client, csv: &ClusterServiceVersion, type_: EventType, reason: &str, note: String) {
    let oref = csv.object_ref(&());
    let recorder = Recorder::new(client.clone(), reporter(), oref);
    if let Err(e) = recorder
        .publish(Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: reason.to_string(),
            secondary: None,
        })
        .await
    {
        warn!(error = %e, csv = %csv.name_any(), "failed to publish event");
    }
}

#[instrument(skip(csv, ctx), fields(name = %csv.name_any(), namespace = %csv.namespace().unwrap_or_default()))]
async fn reconcile(csv: Arc<ClusterServiceVersion>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let name = csv.name_any();
    let namespace = csv.namespace().unwrap_or_default();
    let client = &ctx.client;
    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), &namespace);

    if csv.meta().deletion_timestamp.is_some() {
        gc::delete_owned_resources(client, &name, &namespace).await?;
        remove_finalizer(&api, &name).await?;
        return Ok(Action::await_change());
    }

    let mut status = csv.status.clone().unwrap_or_default();

    if is_copied(&status) {
        // Cross-namespace copy (spec §6 `Copied` condition): a read-only fact this
        // controller recognizes but does not reconcile past `Pending` — the copy
        // itself is propagated by a packageserver/catalog-operator concern out of
        // scope per spec §1, and owns no resources of its own to install or gc.
        return Ok(Action::await_change());
    }

    ensure_finalizer(&api, &name).await?;

    match status.phase {
        CsvPhase::Pending => reconcile_pending(client, &csv, &api, &name, &namespace, &mut status).await,
        CsvPhase::InstallReady => reconcile_install_ready(&api, &name, &mut status).await,
        CsvPhase::Installing => {
            reconcile_installing(client, &csv, &api, &name, &namespace, &mut status, ctx.default_bundle_unpack_timeout).await
        }
        CsvPhase::Succeeded => reconcile_succeeded(client, &csv, &api, &name, &namespace, &mut status).await,
        CsvPhase::Replacing => reconcile_replacing(client, &api, &name, &namespace, &mut status).await,
        CsvPhase::Deleting => {
            api.delete(&name, &DeleteParams::default()).await?;
            Ok(Action::await_change())
        }
        CsvPhase::Failed => reconcile_failed(client, &csv, &namespace, &mut status, &api, &name).await,
    }
}

async fn reconcile_pending(
    client: &Client,
    csv: &ClusterServiceVersion,
    api: &Api<ClusterServiceVersion>,
    name: &str,
    namespace: &str,
    status: &mut ClusterServiceVersionStatus,
) -> Result<Action, Error> {
    let snapshot = ClusterSnapshot::load(client.clone(), namespace).await?;
    let mut unmet = requirements::unmet_requirements(csv, &snapshot, namespace);
    if unmet.is_empty() && !install::min_kube_version_satisfied(client, csv).await {
        unmet.push(requirements::Unmet::InstallMode(crate::types::InstallModeType::AllNamespaces));
    }

    if unmet.is_empty() {
        status.phase = CsvPhase::InstallReady;
        status.reason = Some("AllRequirementsMet".to_string());
        status.message = Some("all requirements satisfied".to_string());
        push_condition(status, CsvPhase::InstallReady, "AllRequirementsMet", None);
        patch_status(api, name, status).await?;
        emit(client, csv, EventType::Normal, "AllRequirementsMet", "all requirements satisfied".to_string()).await;
        Ok(Action::requeue(Duration::from_millis(200)))
    } else {
        let message = unmet.iter().map(|u| u.to_string()).collect::<Vec<_>>().join("; ");
        if status.reason.as_deref() != Some("RequirementsNotMet") || status.message.as_deref() != Some(message.as_str()) {
            status.reason = Some("RequirementsNotMet".to_string());
            status.message = Some(message.clone());
            patch_status(api, name, status).await?;
            emit(client, csv, EventType::Warning, "RequirementsNotMet", message).await;
        }
        Ok(Action::requeue(Duration::from_secs(10)))
    }
}

async fn reconcile_install_ready(
    api: &Api<ClusterServiceVersion>,
    name: &str,
    status: &mut ClusterServiceVersionStatus,
) -> Result<Action, Error> {
    status.phase = CsvPhase::Installing;
    status.installing_since = Some(chrono::Utc::now().to_rfc3339());
    push_condition(status, CsvPhase::Installing, "InstallStarted", None);
    patch_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_millis(200)))
}

async fn reconcile_installing(
    client: &Client,
    csv: &ClusterServiceVersion,
    api: &Api<ClusterServiceVersion>,
    name: &str,
    namespace: &str,
    status: &mut ClusterServiceVersionStatus,
    default_bundle_unpack_timeout: Duration,
) -> Result<Action, Error> {
    let uid = api.get(name).await?.metadata.uid.clone().unwrap_or_default();
    let owner = owner_reference(name, &uid);

    let unpack_timeout = crate::cache::load_operator_group(client, namespace)
        .await
        .ok()
        .flatten()
        .and_then(|og| og.spec.bundle_unpack_timeout_seconds)
        .map(Duration::from_secs)
        .unwrap_or(default_bundle_unpack_timeout);

    let ca_sha = match install::apply_api_service_plumbing(client, csv, namespace, owner.clone()).await {
        Ok(sha) => sha,
        Err(e) => return fail(api, name, status, "InstallComponentFailed", e.to_string()).await,
    };

    if let Err(e) = install::apply_deployments(client, csv, namespace, ca_sha.as_deref(), owner).await {
        return fail(api, name, status, "InstallComponentFailed", e.to_string()).await;
    }

    if ca_sha.is_some() {
        status.last_ca_sha = ca_sha;
    }

    match install::deployments_ready(client, csv, namespace).await {
        Ok(true) => {
            status.phase = CsvPhase::Succeeded;
            status.reason = Some("InstallSucceeded".to_string());
            status.message = Some("install strategy completed".to_string());
            status.certs_rotate_at = None;
            push_condition(status, CsvPhase::Succeeded, "InstallSucceeded", None);
            patch_status(api, name, status).await?;
            emit(client, csv, EventType::Normal, "InstallSucceeded", "install strategy completed".to_string()).await;
            Ok(Action::requeue(Duration::from_secs(30)))
        }
        Ok(false) if unpack_deadline_exceeded(status, unpack_timeout) => {
            fail(
                api,
                name,
                status,
                "BundleUnpackTimeout",
                format!("install strategy not ready after {unpack_timeout:?}"),
            )
            .await
        }
        Ok(false) => Ok(Action::requeue(Duration::from_secs(5))),
        Err(e) if e.is_transient() && !unpack_deadline_exceeded(status, unpack_timeout) => {
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        Err(e) if e.is_transient() => {
            fail(
                api,
                name,
                status,
                "BundleUnpackTimeout",
                format!("install strategy not ready after {unpack_timeout:?}: {e}"),
            )
            .await
        }
        Err(e) => fail(api, name, status, "InstallComponentFailed", e.to_string()).await,
    }
}

/// True once `installing_since` is further in the past than the configured
/// bundle-unpack deadline (spec §5, overridable per-OperatorGroup).
fn unpack_deadline_exceeded(status: &ClusterServiceVersionStatus, default_timeout: Duration) -> bool {
    let Some(since) = status.installing_since.as_deref() else {
        return false;
    };
    let Ok(since) = chrono::DateTime::parse_from_rfc3339(since) else {
        return false;
    };
    let elapsed = chrono::Utc::now().signed_duration_since(since.with_timezone(&chrono::Utc));
    elapsed.to_std().map(|e| e >= default_timeout).unwrap_or(false)
}

async fn reconcile_succeeded(
    client: &Client,
    csv: &ClusterServiceVersion,
    api: &Api<ClusterServiceVersion>,
    name: &str,
    namespace: &str,
    status: &mut ClusterServiceVersionStatus,
) -> Result<Action, Error> {
    let snapshot = ClusterSnapshot::load(client.clone(), namespace).await?;

    if let Some(mode) = requirements::unmet_requirements(csv, &snapshot, namespace)
        .into_iter()
        .find_map(|u| match u {
            requirements::Unmet::InstallMode(m) => Some(m),
            _ => None,
        })
    {
        return fail(
            api,
            name,
            status,
            "UnsupportedOperatorGroup",
            format!("OperatorGroup no longer supports install mode {mode:?}"),
        )
        .await;
    }

    if status.certs_rotate_at.is_some() && !csv.spec.apiservicedefinitions.owned.is_empty() {
        status.phase = CsvPhase::Installing;
        status.installing_since = Some(chrono::Utc::now().to_rfc3339());
        patch_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_millis(200)));
    }

    if let Some(successor) = find_successor(client, name, namespace).await? {
        status.phase = CsvPhase::Replacing;
        status.message = Some(format!("superseded by {successor}"));
        push_condition(status, CsvPhase::Replacing, "BeingReplaced", Some(successor));
        patch_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_millis(200)));
    }

    match install::deployments_ready(client, csv, namespace).await {
        Ok(true) => Ok(Action::requeue(Duration::from_secs(30))),
        Ok(false) => {
            status.phase = CsvPhase::Pending;
            status.reason = Some("RequirementsNotMet".to_string());
            status.message = Some("deployment no longer ready".to_string());
            patch_status(api, name, status).await?;
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        Err(e) if e.is_transient() => Ok(Action::requeue(Duration::from_secs(5))),
        Err(e) => Err(e),
    }
}

/// A CSV is superseded once another CSV naming this one in `spec.replaces` has
/// itself reached `Succeeded` (spec §4.6 `Replacing`).
async fn find_successor(client: &Client, name: &str, namespace: &str) -> Result<Option<String>, Error> {
    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), namespace);
    let all = api.list(&ListParams::default()).await?;
    Ok(all
        .items
        .into_iter()
        .find(|c| {
            c.spec.replaces.as_deref() == Some(name)
                && c.status.as_ref().map(|s| s.phase) == Some(CsvPhase::Succeeded)
        })
        .map(|c| c.name_any()))
}

async fn reconcile_replacing(
    client: &Client,
    api: &Api<ClusterServiceVersion>,
    name: &str,
    namespace: &str,
    status: &mut ClusterServiceVersionStatus,
) -> Result<Action, Error> {
    if let Some(successor) = find_successor(client, name, namespace).await? {
        adoption::orphan_resources_to_successor(client, name, &successor, namespace).await?;
    }
    status.phase = CsvPhase::Deleting;
    patch_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_millis(200)))
}

async fn reconcile_failed(
    client: &Client,
    csv: &ClusterServiceVersion,
    namespace: &str,
    status: &mut ClusterServiceVersionStatus,
    api: &Api<ClusterServiceVersion>,
    name: &str,
) -> Result<Action, Error> {
    let snapshot = ClusterSnapshot::load(client.clone(), namespace).await?;
    if requirements::unmet_requirements(csv, &snapshot, namespace).is_empty() {
        status.phase = CsvPhase::Pending;
        status.reason = None;
        status.message = None;
        patch_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_millis(200)));
    }
    Ok(Action::requeue(Duration::from_secs(15)))
}

async fn fail(
    api: &Api<ClusterServiceVersion>,
    name: &str,
    status: &mut ClusterServiceVersionStatus,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    status.phase = CsvPhase::Failed;
    status.reason = Some(reason.to_string());
    status.message = Some(message.clone());
    push_condition(status, CsvPhase::Failed, reason, Some(message));
    patch_status(api, name, status).await?;
    Ok(Action::await_change())
}

/// True when `status` carries a `Copied` condition (spec §6), marking this CSV as
/// a cross-namespace copy rather than one this controller installs.
fn is_copied(status: &ClusterServiceVersionStatus) -> bool {
    status.conditions.iter().any(|c| c.reason.as_deref() == Some("Copied"))
}

fn push_condition(status: &mut ClusterServiceVersionStatus, phase: CsvPhase, reason: &str, message: Option<String>) {
    status.conditions.push(CsvCondition {
        phase,
        reason: Some(reason.to_string()),
        message,
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
    });
}

async fn patch_status(api: &Api<ClusterServiceVersion>, name: &str, status: &ClusterServiceVersionStatus) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await?;
    Ok(())
}

async fn ensure_finalizer(api: &Api<ClusterServiceVersion>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<ClusterServiceVersion>, name: &str) -> Result<(), Error> {
    let patch = serde_json::json!({ "metadata": { "finalizers": [] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

fn error_policy(_csv: Arc<ClusterServiceVersion>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "csv reconcile error");
    Action::requeue(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copied_condition_is_detected() {
        let mut status = ClusterServiceVersionStatus::default();
        assert!(!is_copied(&status));
        push_condition(&mut status, CsvPhase::Pending, "Copied", None);
        assert!(is_copied(&status));
    }
}
