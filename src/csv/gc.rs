//! `Deleting` phase (spec §4.6, invariant I5): "garbage-collect owned resources;
//! remove finalizer; CSV is deleted." One `Api<K>::delete` call per owned kind,
//! covering every kind the Step Executor (E) and the CSV install step (F) can create.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client, ResourceExt};

use crate::error::Result;
use crate::labels::{OWNER, OWNER_NAMESPACE};

fn owner_selector(csv_name: &str, namespace: &str) -> ListParams {
    ListParams::default().labels(&format!("{OWNER}={csv_name},{OWNER_NAMESPACE}={namespace}"))
}

/// Deletes `name`, treating "already gone" as success. Any other error (permission
/// denied, webhook rejection, etc.) is propagated so the caller doesn't remove the
/// finalizer over a resource that's still there (invariant I5).
async fn delete_ignoring_not_found<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + serde::Serialize,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_namespaced<K>(api: &Api<K>, selector: &ListParams) -> Result<()>
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
        delete_ignoring_not_found(api, &name).await?;
    }
    Ok(())
}

async fn delete_cluster_scoped<K>(api: &Api<K>, selector: &ListParams) -> Result<()>
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
        delete_ignoring_not_found(api, &name).await?;
    }
    Ok(())
}

/// Deletes every resource labeled `olm.owner = <csv_name>, olm.owner.namespace =
/// <namespace>` across the kinds the executor and CSV reconciler create.
pub async fn delete_owned_resources(client: &Client, csv_name: &str, namespace: &str) -> Result<()> {
    let selector = owner_selector(csv_name, namespace);

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&deployments, &selector).await?;

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&services, &selector).await?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&secrets, &selector).await?;

    let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&service_accounts, &selector).await?;

    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&roles, &selector).await?;

    let role_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    delete_namespaced(&role_bindings, &selector).await?;

    // extension-apiserver-authentication-reader RoleBinding lives in kube-system,
    // not this CSV's own namespace (spec §4.6), so it needs its own selector pass.
    let kube_system_bindings: Api<RoleBinding> = Api::namespaced(client.clone(), "kube-system");
    delete_namespaced(&kube_system_bindings, &selector).await?;

    let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
    delete_cluster_scoped(&cluster_roles, &selector).await?;

    let cluster_role_bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
    delete_cluster_scoped(&cluster_role_bindings, &selector).await?;

    let api_services: Api<APIService> = Api::all(client.clone());
    delete_cluster_scoped(&api_services, &selector).await?;

    Ok(())
}
