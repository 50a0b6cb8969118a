//! Step Executor (E) — spec §4.5.
//!
//! One handler per `StepResource.kind`; the set is closed and known at compile
//! time (spec §9 "Polymorphism over resources"). Every handler is idempotent and
//! tolerant of a 409 conflict from a concurrent write (the kind of races the
//! cluster snapshot's staleness already expects, spec §4.2).

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionSpec, CustomResourceDefinitionVersion,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::warn;

use crate::error::{Error, Result};
use crate::installplan::safe_upgrade;
use crate::labels::is_adoptable;
use crate::types::{ClusterServiceVersion, OwnedCrd, Step, StepStatus};

const FIELD_MANAGER: &str = "olm-core";

/// Applies one step against the cluster, advancing `step.status` in place.
/// Returns the step's resulting status; callers persist the updated `Step` into
/// `InstallPlan.status.plan`.
pub async fn execute_step(
    client: &Client,
    step: &mut Step,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<()> {
    if step.status == StepStatus::Created {
        return Ok(()); // §3 invariant: a Created step is never re-applied.
    }

    match step.resource.kind.as_str() {
        "CustomResourceDefinition" => apply_crd(client, step).await,
        "ClusterServiceVersion" => apply_csv(client, step, namespace).await,
        "ServiceAccount" => apply_service_account(client, step, namespace, owner).await,
        "Role" => apply_role(client, step, namespace, owner).await,
        "RoleBinding" => apply_role_binding(client, step, namespace, owner).await,
        "ClusterRole" => apply_cluster_role(client, step, namespace, owner).await,
        "ClusterRoleBinding" => apply_cluster_role_binding(client, step, namespace, owner).await,
        "Secret" => apply_secret(client, step, namespace, owner).await,
        "APIService" => apply_api_service(client, step, namespace, owner).await,
        "Subscription" => apply_subscription(client, step, namespace).await,
        other => Err(Error::Other(format!("no step handler for kind {other}"))),
    }
}

/// Parses a CRD step's manifest, which is either a full `CustomResourceDefinition`
/// (catalog supplied one) or a bare `OwnedCrd` reference (the grpc catalog's wire
/// format doesn't carry manifests, spec §4.1) — in which case a single-version CRD
/// with that version `served`/`storage` is synthesized.
fn parse_crd_manifest(manifest: &str) -> Result<CustomResourceDefinition> {
    if let Ok(crd) = serde_json::from_str::<CustomResourceDefinition>(manifest) {
        return Ok(crd);
    }
    let owned: OwnedCrd = serde_json::from_str(manifest)?;
    Ok(CustomResourceDefinition {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(owned.name.clone()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: owned.group.clone(),
            names: k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionNames {
                kind: owned.kind.clone(),
                plural: owned.plural.clone(),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: owned.version.clone(),
                served: true,
                storage: true,
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    })
}

async fn apply_crd(client: &Client, step: &mut Step) -> Result<()> {
    let desired = parse_crd_manifest(&step.resource.manifest)?;
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());

    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        let stored = existing
            .status
            .as_ref()
            .and_then(|s| s.stored_versions.clone())
            .unwrap_or_default();
        let new_versions: Vec<String> = desired.spec.versions.iter().map(|v| v.name.clone()).collect();
        safe_upgrade::check_safe_upgrade(&step.resource.name, &stored, &new_versions)?;
    }

    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_csv(client: &Client, step: &mut Step, namespace: &str) -> Result<()> {
    let desired: ClusterServiceVersion = serde_json::from_str(&step.resource.manifest)?;
    let api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), namespace);

    // §4.5: reject if an owned APIService is already claimed by a different,
    // non-replaced CSV.
    let apisvc_api: Api<APIService> = Api::all(client.clone());
    for owned in &desired.spec.apiservicedefinitions.owned {
        if let Some(existing) = apisvc_api.get_opt(&owned.name).await? {
            if let Some((owner_csv, _)) = crate::labels::owner_ref(&existing.metadata) {
                let is_predecessor = desired.spec.replaces.as_deref() == Some(owner_csv.as_str());
                if owner_csv != desired.name_any() && !is_predecessor {
                    return Err(Error::OwnerConflict {
                        resource: owned.name.clone(),
                        existing_owner: owner_csv,
                    });
                }
            }
        }
    }

    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_service_account(
    client: &Client,
    step: &mut Step,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<()> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            warn!(name = %step.resource.name, "ServiceAccount already present, not owned by this CSV; leaving untouched");
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let sa = crate::resources::service_account(&step.resource.name, namespace, owner.clone());
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&sa),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_role(client: &Client, step: &mut Step, namespace: &str, owner: &OwnerReference) -> Result<()> {
    let perm: crate::types::PermissionSpec = serde_json::from_str(&step.resource.manifest)?;
    let api: Api<Role> = Api::namespaced(client.clone(), namespace);
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let role = crate::resources::role(&step.resource.name, namespace, &perm, owner.clone());
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&role),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_role_binding(
    client: &Client,
    step: &mut Step,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<()> {
    let perm: crate::types::PermissionSpec = serde_json::from_str(&step.resource.manifest)?;
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let role_name = format!("{}-role", owner.name);
    let binding = crate::resources::role_binding(
        &step.resource.name,
        namespace,
        &role_name,
        &perm.service_account_name,
        owner.clone(),
    );
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&binding),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_cluster_role(
    client: &Client,
    step: &mut Step,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<()> {
    let perm: crate::types::PermissionSpec = serde_json::from_str(&step.resource.manifest)?;
    let api: Api<ClusterRole> = Api::all(client.clone());
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let cr = crate::resources::cluster_role(&step.resource.name, namespace, &perm, owner.clone());
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&cr),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_cluster_role_binding(
    client: &Client,
    step: &mut Step,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<()> {
    let perm: crate::types::PermissionSpec = serde_json::from_str(&step.resource.manifest)?;
    let api: Api<ClusterRoleBinding> = Api::all(client.clone());
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let cluster_role_name = format!("{}-clusterrole", owner.name);
    let binding = crate::resources::cluster_role_binding(
        &step.resource.name,
        namespace,
        &cluster_role_name,
        &perm.service_account_name,
        owner.clone(),
    );
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&binding),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_secret(client: &Client, step: &mut Step, namespace: &str, owner: &OwnerReference) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            step.status = StepStatus::Present;
            return Ok(());
        }
    }
    let desired: Secret = serde_json::from_str(&step.resource.manifest)?;
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

/// Owned APIServices are always recreated with a fresh serving cert (spec §4.5);
/// a pre-existing APIService is adopted only if it already carries this CSV's
/// ownership labels.
async fn apply_api_service(client: &Client, step: &mut Step, namespace: &str, owner: &OwnerReference) -> Result<()> {
    let api: Api<APIService> = Api::all(client.clone());
    if let Some(existing) = api.get_opt(&step.resource.name).await? {
        if !is_adoptable(&existing.metadata, &owner.name, namespace) {
            return Err(Error::OwnerConflict {
                resource: step.resource.name.clone(),
                existing_owner: existing.name_any(),
            });
        }
    }
    let desired: APIService = serde_json::from_str(&step.resource.manifest)?;
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

async fn apply_subscription(client: &Client, step: &mut Step, namespace: &str) -> Result<()> {
    let api: Api<crate::types::Subscription> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(&step.resource.name).await?.is_some() {
        step.status = StepStatus::Present;
        return Ok(());
    }
    let v: serde_json::Value = serde_json::from_str(&step.resource.manifest)?;
    let sub = crate::types::Subscription::new(
        &step.resource.name,
        crate::types::SubscriptionSpec {
            catalog_source: v["catalogSource"].as_str().unwrap_or_default().to_string(),
            catalog_source_namespace: v["catalogSourceNamespace"].as_str().unwrap_or_default().to_string(),
            package_name: v["packageName"].as_str().unwrap_or_default().to_string(),
            channel: v["channel"].as_str().unwrap_or_default().to_string(),
            starting_csv: None,
            install_plan_approval: crate::types::ApprovalModeField::Automatic,
        },
    );
    api.patch(
        &step.resource.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&sub),
    )
    .await?;
    step.status = StepStatus::Created;
    Ok(())
}

/// Standalone sweep for APIServices whose ownership labels point at a CSV/namespace
/// pair that no longer exists (spec §4.5 "a separate sweep"). Intended to run on a
/// timer from `main.rs`, independent of any single InstallPlan's step sequence.
pub async fn sweep_orphaned_api_services(client: Client) -> Result<usize> {
    let api: Api<APIService> = Api::all(client.clone());
    let all = api.list(&Default::default()).await?;
    let mut deleted = 0;

    for svc in all.items {
        let Some((owner_csv, owner_ns)) = crate::labels::owner_ref(&svc.metadata) else {
            continue;
        };
        let csv_api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), &owner_ns);
        if csv_api.get_opt(&owner_csv).await?.is_none() {
            let name = svc.name_any();
            warn!(apiservice = %name, csv = %owner_csv, namespace = %owner_ns, "deleting orphaned APIService");
            api.delete(&name, &Default::default()).await?;
            deleted += 1;
        }
    }

    Ok(deleted)
}
