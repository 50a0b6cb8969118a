//! CatalogSource controller — spec §6 "Catalog protocols" and the poll-interval
//! note in §5 ("Catalog-source poll interval is per-CatalogSource, minimum 15
//! seconds"). For `sourceType: internal`, wraps the backing ConfigMap in a
//! registry Pod/Service pair and rolls the pod on ConfigMap change; for
//! `sourceType: grpc`, just tracks connectivity against the configured address.
//! The registry binary itself is out of this crate's scope (spec §1); this
//! controller only manages the Kubernetes objects around it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::error::Error;
use crate::resources;
use crate::types::{CatalogSource, CatalogSourceStatus, SourceType};

const FIELD_MANAGER: &str = "olm-core";

#[derive(Clone)]
struct Ctx {
    client: Client,
    min_poll_interval: Duration,
}

pub async fn run(client: Client, watch_namespace: &str, config: &Config) -> anyhow::Result<()> {
    let api: Api<CatalogSource> = match watch_namespace {
        "" => Api::all(client.clone()),
        ns => Api::namespaced(client.clone(), ns),
    };
    let ctx = Arc::new(Ctx {
        client,
        min_poll_interval: config.min_catalog_poll_interval,
    });

    Controller::new(api, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((objref, _)) => info!(catalogsource = %objref.name, "reconciled"),
                Err(e) => error!(error = %e, "catalogsource reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(source, ctx), fields(name = %source.name_any(), namespace = %source.namespace().unwrap_or_default()))]
async fn reconcile(source: Arc<CatalogSource>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let name = source.name_any();
    let namespace = source.namespace().unwrap_or_default();
    let client = &ctx.client;
    let api: Api<CatalogSource> = Api::namespaced(client.clone(), &namespace);

    let poll_interval = source
        .spec
        .update_strategy_interval_seconds
        .map(Duration::from_secs)
        .unwrap_or(ctx.min_poll_interval)
        .max(ctx.min_poll_interval);

    let status = match source.spec.source_type {
        SourceType::Internal => reconcile_internal(client, &source, &name, &namespace).await?,
        SourceType::Grpc => reconcile_grpc(client, &source, &name, &namespace).await,
    };

    patch_status(&api, &name, &status).await?;
    Ok(Action::requeue(poll_interval))
}

/// Applies the registry Pod/Service pair for an internal source, keyed off the
/// backing ConfigMap's `resourceVersion` so a ConfigMap edit forces a pod replace
/// (spec §6 ownership label contract: "pod rollouts can be detected by ConfigMap
/// version change").
async fn reconcile_internal(
    client: &Client,
    source: &CatalogSource,
    name: &str,
    namespace: &str,
) -> Result<CatalogSourceStatus, Error> {
    let config_map_name = source.spec.config_map.clone().unwrap_or_else(|| name.to_string());
    let cm_api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = match cm_api.get_opt(&config_map_name).await? {
        Some(cm) => cm,
        None => {
            return Ok(CatalogSourceStatus {
                connection_state: Some("ConfigMapNotFound".to_string()),
                registry_service_name: None,
                last_sync: None,
                config_map_resource_version: None,
            });
        }
    };
    let resource_version = config_map.resource_version().unwrap_or_default();

    let uid = source.metadata.uid.clone().unwrap_or_default();
    let owner = resources::catalog_source_owner_reference(name, &uid);

    let pod = resources::registry_pod(name, namespace, &config_map_name, &resource_version, owner.clone());
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let pod_api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let needs_replace = match pod_api.get_opt(&pod_name).await? {
        Some(existing) => {
            existing
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(crate::labels::CONFIGMAP_RESOURCE_VERSION))
                .map(String::as_str)
                != Some(resource_version.as_str())
        }
        None => true,
    };

    if needs_replace {
        pod_api
            .patch(&pod_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&pod))
            .await?;
    }

    let svc = resources::registry_service(name, namespace, &resource_version, owner);
    let svc_name = resources::registry_service_name(name);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), namespace);
    svc_api
        .patch(&svc_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&svc))
        .await?;

    Ok(CatalogSourceStatus {
        connection_state: Some("Ready".to_string()),
        registry_service_name: Some(svc_name),
        last_sync: Some(chrono::Utc::now().to_rfc3339()),
        config_map_resource_version: Some(resource_version),
    })
}

/// Address-only gRPC sources have no objects to manage; a list-packages call
/// against the configured endpoint stands in for a connectivity probe.
async fn reconcile_grpc(client: &Client, source: &CatalogSource, name: &str, namespace: &str) -> CatalogSourceStatus {
    let handle = crate::catalog::client_for(client.clone(), source);
    let connection_state = match handle.list_packages().await {
        Ok(_) => "Ready".to_string(),
        Err(e) => {
            warn!(catalogsource = %name, namespace = %namespace, error = %e, "grpc catalog source unreachable");
            "TransientFailure".to_string()
        }
    };

    CatalogSourceStatus {
        connection_state: Some(connection_state),
        registry_service_name: None,
        last_sync: Some(chrono::Utc::now().to_rfc3339()),
        config_map_resource_version: None,
    }
}

async fn patch_status(api: &Api<CatalogSource>, name: &str, status: &CatalogSourceStatus) -> Result<(), Error> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await?;
    Ok(())
}

fn error_policy(_source: Arc<CatalogSource>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    error!(error = %err, "catalogsource reconcile error");
    Action::requeue(Duration::from_secs(10))
}
