//! Subscription reconciliation — spec §4.3's entry point ("a Subscription change
//! wakes the Resolver"). Builds the cluster snapshot and catalog handles for the
//! namespace, calls the Resolver (C), and writes the resulting `InstallPlan`.
//!
//! One reconcile pass resolves every Subscription in the namespace at once (the
//! Resolver's algorithm is defined over the whole namespace, spec §4.3 "Given: the
//! set of Subscriptions in a namespace"), so any Subscription in a namespace
//! triggers the same shared computation; the InstallPlan name is content-addressed
//! (see `plan_name`) so repeat resolutions to an unchanged result are no-ops and a
//! changed resolution creates a new plan alongside the old one, left in place until
//! terminal (spec §4.4 "Concurrency").

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{error, info, instrument, warn};

use crate::cache::ClusterSnapshot;
use crate::catalog;
use crate::error::Error;
use crate::resolver::{self, CatalogHandle, ResolutionInput};
use crate::types::{
    ApprovalMode, CatalogSource, InstallPlan, InstallPlanCondition, InstallPlanSpec,
    InstallPlanStatus, Phase, Subscription, SubscriptionCondition, SubscriptionState,
    SubscriptionStatus,
};

const FIELD_MANAGER: &str = "olm-core";

#[derive(Clone)]
struct Ctx {
    client: Client,
}

pub async fn run(client: Client, watch_namespace: &str) -> anyhow::Result<()> {
    let api: Api<Subscription> = match watch_namespace {
        "" => Api::all(client.clone()),
        ns => Api::namespaced(client.clone(), ns),
    };
    let ctx = Arc::new(Ctx { client });

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((objref, _)) => info!(subscription = %objref.name, "reconciled"),
                Err(e) => error!(error = %e, "subscription reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(sub, ctx), fields(name = %sub.name_any(), namespace = %sub.namespace().unwrap_or_default()))]
async fn reconcile(sub: Arc<Subscription>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let namespace = sub.namespace().unwrap_or_default();
    let client = &ctx.client;

    let sub_api: Api<Subscription> = Api::namespaced(client.clone(), &namespace);
    let subscriptions: Vec<Subscription> = sub_api.list(&ListParams::default()).await?.items;

    let catsrc_api: Api<CatalogSource> = Api::all(client.clone());
    let sources: Vec<CatalogSource> = catsrc_api.list(&ListParams::default()).await?.items;
    let catalogs: Vec<CatalogHandle> = sources
        .iter()
        .map(|s| CatalogHandle {
            name: s.name_any(),
            namespace: s.namespace().unwrap_or_default(),
            client: catalog::client_for(client.clone(), s),
        })
        .collect();

    let snapshot = ClusterSnapshot::load(client.clone(), &namespace).await?;

    let input = ResolutionInput {
        namespace: &namespace,
        subscriptions: &subscriptions,
        snapshot: &snapshot,
        catalogs: &catalogs,
    };

    match resolver::resolve(input).await {
        Ok(resolution) => {
            if resolution.steps.is_empty() {
                return Ok(Action::requeue(Duration::from_secs(30)));
            }

            let plan_name = plan_name(&namespace, &resolution.steps);
            write_install_plan(client, &namespace, &plan_name, &resolution).await?;

            for s in &subscriptions {
                update_subscription_status(client, &namespace, s, &plan_name, &resolution, None).await?;
            }

            Ok(Action::requeue(Duration::from_secs(10)))
        }
        Err(e) if e.is_transient() => {
            // §4.3 failure modes: "CatalogUnavailable (transient ⇒ the subscription
            // reports CatalogSourcesUnhealthy; no InstallPlan is written)".
            warn!(error = %e, "catalog unavailable, no InstallPlan written");
            update_subscription_status(client, &namespace, &sub, "", &empty_resolution(), Some(&e)).await?;
            Ok(Action::requeue(Duration::from_secs(15)))
        }
        Err(e) => {
            // Every other resolver failure (DependencyConflict, PackageNotFound,
            // ChannelNotFound) is "fatal to a single InstallPlan" (spec §7): the
            // spec's Open Question is resolved in favor of the normative text in
            // §4.4 ("Terminal only on resolver error (→ Failed ...)") over the
            // competing historical test, so the plan itself reaches `Failed` rather
            // than lingering in `Planning`.
            warn!(error = %e, "resolution failed");
            let plan_name = write_failed_install_plan(client, &namespace, &subscriptions, &e).await?;
            update_subscription_status(client, &namespace, &sub, &plan_name, &empty_resolution(), Some(&e)).await?;
            Ok(Action::requeue(Duration::from_secs(30)))
        }
    }
}

fn empty_resolution() -> resolver::Resolution {
    resolver::Resolution {
        steps: Vec::new(),
        requires_approval: false,
        bundles: Vec::new(),
    }
}

/// Content-addressed InstallPlan name (spec §9 "Global mutable state" sidesteps a
/// random-name generator): stable across repeat resolutions of the same steps, but
/// a new name whenever the resolution changes, so the old plan is "left in place
/// until terminal" per spec §4.4 rather than overwritten.
fn plan_name(namespace: &str, steps: &[crate::types::Step]) -> String {
    let mut hasher = Sha256::new();
    for step in steps {
        hasher.update(step.resource.kind.as_bytes());
        hasher.update(step.resource.name.as_bytes());
        hasher.update(step.resource.manifest.as_bytes());
    }
    let digest = hasher.finalize();
    let short = hex_prefix(&digest, 10);
    format!("install-{namespace}-{short}")
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

async fn write_install_plan(
    client: &Client,
    namespace: &str,
    plan_name: &str,
    resolution: &resolver::Resolution,
) -> Result<(), Error> {
    let csv_names: Vec<String> = resolution
        .steps
        .iter()
        .filter(|s| s.resource.kind == "ClusterServiceVersion")
        .map(|s| s.resource.name.clone())
        .collect();

    let approval = if resolution.requires_approval {
        ApprovalMode::Manual
    } else {
        ApprovalMode::Automatic
    };

    let plan = InstallPlan::new(
        plan_name,
        InstallPlanSpec {
            cluster_service_version_names: csv_names,
            approval,
            approved: false,
        },
    );

    let api: Api<InstallPlan> = Api::namespaced(client.clone(), namespace);
    let existing = api.get_opt(plan_name).await?;
    if existing.is_none() {
        api.patch(
            plan_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&plan),
        )
        .await?;

        let status_patch = serde_json::json!({
            "status": {
                "phase": Phase::Planning,
                "plan": resolution.steps,
                "conditions": [],
            }
        });
        api.patch_status(plan_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&status_patch))
            .await?;
    }

    Ok(())
}

/// Content-addressed over the error text rather than a steps list (there is no
/// resolution to hash): stable across repeat failures of the same cause, so a
/// retry that hits the identical error is a no-op, but a changed cause writes a
/// fresh plan rather than mutating a terminal one in place (spec §3 "once a
/// step's status reaches Created, it is not re-applied" — by extension, a
/// terminal plan is not silently rewritten either).
async fn write_failed_install_plan(
    client: &Client,
    namespace: &str,
    subscriptions: &[Subscription],
    error: &Error,
) -> Result<String, Error> {
    let mut hasher = Sha256::new();
    let mut names: Vec<String> = subscriptions.iter().map(|s| s.name_any()).collect();
    names.sort();
    for name in &names {
        hasher.update(name.as_bytes());
    }
    hasher.update(error.to_string().as_bytes());
    let digest = hasher.finalize();
    let plan_name = format!("install-{namespace}-failed-{}", hex_prefix(&digest, 10));

    let api: Api<InstallPlan> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(&plan_name).await?.is_some() {
        return Ok(plan_name);
    }

    let csv_names: Vec<String> = subscriptions
        .iter()
        .filter_map(|s| s.spec.starting_csv.clone())
        .collect();

    let plan = InstallPlan::new(
        &plan_name,
        InstallPlanSpec {
            cluster_service_version_names: csv_names,
            approval: ApprovalMode::Automatic,
            approved: false,
        },
    );
    api.patch(
        &plan_name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&plan),
    )
    .await?;

    let reason = failure_reason(error);
    let status = InstallPlanStatus {
        phase: Phase::Failed,
        plan: Vec::new(),
        conditions: vec![InstallPlanCondition {
            type_: "Resolved".to_string(),
            status: "False".to_string(),
            reason: Some(reason),
            message: Some(error.to_string()),
        }],
    };
    let status_patch = serde_json::json!({ "status": status });
    api.patch_status(&plan_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&status_patch))
        .await?;

    Ok(plan_name)
}

async fn update_subscription_status(
    client: &Client,
    namespace: &str,
    sub: &Subscription,
    plan_name: &str,
    resolution: &resolver::Resolution,
    error: Option<&Error>,
) -> Result<(), Error> {
    let name = sub.name_any();
    let mut status: SubscriptionStatus = sub.status.clone().unwrap_or_default();

    if let Some(prior_plan) = status.install_plan_ref.clone() {
        sync_installed_csv(client, namespace, &mut status, &prior_plan).await?;
    }

    if let Some(e) = error {
        if !plan_name.is_empty() {
            status.install_plan_ref = Some(plan_name.to_string());
        }
        status.state = Some(SubscriptionState::FailedToCheckCatalogSource);
        status.conditions = vec![SubscriptionCondition {
            type_: "ResolutionFailed".to_string(),
            status: "True".to_string(),
            reason: Some(failure_reason(e)),
            message: Some(e.to_string()),
        }];
    } else {
        let current_csv = resolution
            .bundles
            .iter()
            .find(|b| b.package_name == sub.spec.package_name)
            .map(|b| b.csv_name.clone());

        if current_csv.is_some() {
            status.current_csv = current_csv;
            status.install_plan_ref = Some(plan_name.to_string());
            status.state = Some(SubscriptionState::UpgradePending);
            status.conditions = Vec::new();
        }
    }

    let api: Api<Subscription> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await?;
    Ok(())
}

/// Spec §8 I1: once the referenced InstallPlan reaches `Complete`, the
/// subscription's `installedCSV` catches up to `currentCSV`.
async fn sync_installed_csv(
    client: &Client,
    namespace: &str,
    status: &mut SubscriptionStatus,
    plan_name: &str,
) -> Result<(), Error> {
    let api: Api<InstallPlan> = Api::namespaced(client.clone(), namespace);
    let Some(plan) = api.get_opt(plan_name).await? else {
        return Ok(());
    };
    let phase = plan.status.map(|s| s.phase).unwrap_or_default();
    match phase {
        Phase::Complete => {
            status.installed_csv = status.current_csv.clone();
            status.state = Some(SubscriptionState::AtLatestKnown);
        }
        Phase::Failed => {
            status.state = Some(SubscriptionState::FailedToCheckCatalogSource);
        }
        _ => {}
    }
    Ok(())
}

fn failure_reason(e: &Error) -> String {
    match e {
        Error::PackageNotFound(_) => "PackageNotFound".to_string(),
        Error::ChannelNotFound { .. } => "ChannelNotFound".to_string(),
        Error::DependencyConflict(_) => "DependencyConflict".to_string(),
        Error::CatalogUnavailable(_) => "CatalogSourcesUnhealthy".to_string(),
        _ => "ResolutionFailed".to_string(),
    }
}

fn error_policy(_sub: Arc<Subscription>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "subscription reconcile error");
    Action::requeue(Duration::from_secs(10))
}
