//! Ownership transfer for the `Replacing` state (spec §4.6): "orphans owned
//! resources to the replacement via label rewrite." One small free function per
//! owned kind, rewriting ownership labels instead of deleting.

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

use crate::error::Result;
use crate::labels::{OWNER, OWNER_NAMESPACE};

const FIELD_MANAGER: &str = "olm-core";

fn owner_selector(predecessor: &str, namespace: &str) -> ListParams {
    ListParams::default().labels(&format!("{OWNER}={predecessor},{OWNER_NAMESPACE}={namespace}"))
}

async fn relabel<K>(api: &Api<K>, selector: &ListParams, successor: &str) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
{
    let items = api.list(selector).await?;
    for item in items.items {
        let name = item.name_any();
        let patch = serde_json::json!({ "metadata": { "labels": { OWNER: successor } } });
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

async fn relabel_cluster_scoped<K>(api: &Api<K>, selector: &ListParams, successor: &str) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::ClusterResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + serde::Serialize,
{
    let items = api.list(selector).await?;
    for item in items.items {
        let name = item.name_any();
        let patch = serde_json::json!({ "metadata": { "labels": { OWNER: successor } } });
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
    }
    Ok(())
}

/// Rewrites the `olm.owner` label on every resource the `predecessor` CSV owns in
/// `namespace` to point at `successor`, so the successor's next reconcile pass
/// treats them as adoptable (spec §4.5's "adoptable" predicate).
pub async fn orphan_resources_to_successor(
    client: &Client,
    predecessor: &str,
    successor: &str,
    namespace: &str,
) -> Result<()> {
    let selector = owner_selector(predecessor, namespace);

    let sa: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    relabel(&sa, &selector, successor).await?;

    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    relabel(&roles, &selector, successor).await?;

    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    relabel(&role_bindings, &selector, successor).await?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    relabel(&secrets, &selector, successor).await?;

    let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
    relabel_cluster_scoped(&cluster_roles, &selector, successor).await?;

    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
    relabel_cluster_scoped(&cluster_role_bindings, &selector, successor).await?;

    let api_services: Api<APIService> = Api::all(client.clone());
    relabel_cluster_scoped(&api_services, &selector, successor).await?;

    Ok(())
}
