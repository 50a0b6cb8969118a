//! `Installing` phase (spec §4.6): creates/updates the CSV's deployments and
//! owned-APIService plumbing. Permission RBAC (ServiceAccount/Role/RoleBinding/
//! ClusterRole/ClusterRoleBinding derived from `spec.permissions`/`cluster_permissions`)
//! is materialized by the InstallPlan Step Executor (E) from the resolver's emitted
//! steps, not here; this module only builds what §4.6 names as F's own
//! responsibility: Deployments plus the Service/Secret/APIService/auth-delegation
//! plumbing for owned APIServices.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

use crate::csv::certs;
use crate::error::Result;
use crate::resources;
use crate::types::ClusterServiceVersion;

const FIELD_MANAGER: &str = "olm-core";

/// Service account the auth-delegation plumbing runs as: the install strategy's
/// first deployment pod-template `serviceAccountName`, falling back to the CSV's
/// first declared permission, falling back to `default`.
fn service_account_name(csv: &ClusterServiceVersion) -> String {
    for dep in &csv.spec.install.deployments {
        if let Some(sa) = dep
            .spec
            .get("template")
            .and_then(|t| t.get("spec"))
            .and_then(|s| s.get("serviceAccountName"))
            .and_then(|v| v.as_str())
        {
            return sa.to_string();
        }
    }
    csv.spec
        .permissions
        .first()
        .map(|p| p.service_account_name.clone())
        .unwrap_or_else(|| "default".to_string())
}

/// Applies every Deployment in the CSV's install strategy, stamping the current
/// CA-sha annotation (or `None` if the CSV owns no APIServices) onto each pod
/// template so a cert rotation forces a rolling update (spec §4.6).
pub async fn apply_deployments(
    client: &Client,
    csv: &ClusterServiceVersion,
    namespace: &str,
    ca_sha: Option<&str>,
    owner: OwnerReference,
) -> Result<()> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for spec_ref in &csv.spec.install.deployments {
        let deployment = resources::deployment(namespace, spec_ref, ca_sha, owner.clone())?;
        api.patch(
            &spec_ref.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&deployment),
        )
        .await?;
    }
    Ok(())
}

/// True once every deployment in the install strategy reports its current
/// generation observed and its desired replica count available (spec §4.6
/// `Succeeded`: "all deployments report observed generation matching spec and
/// replicas available").
pub async fn deployments_ready(client: &Client, csv: &ClusterServiceVersion, namespace: &str) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for spec_ref in &csv.spec.install.deployments {
        let Some(dep) = api.get_opt(&spec_ref.name).await? else {
            return Ok(false);
        };
        let desired_generation = dep.metadata.generation.unwrap_or(0);
        let Some(status) = dep.status else {
            return Ok(false);
        };
        if status.observed_generation.unwrap_or(-1) != desired_generation {
            return Ok(false);
        }
        let desired_replicas = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        if status.available_replicas.unwrap_or(0) < desired_replicas {
            return Ok(false);
        }
    }
    Ok(true)
}

/// For each owned APIService: generates a fresh serving cert, creates the cert
/// Secret and front Service, registers the APIService itself, and wires the
/// `system:auth-delegator`/`extension-apiserver-authentication-reader` bindings
/// every aggregated API server needs (spec §4.6).
pub async fn apply_api_service_plumbing(
    client: &Client,
    csv: &ClusterServiceVersion,
    namespace: &str,
    owner: OwnerReference,
) -> Result<Option<String>> {
    if csv.spec.apiservicedefinitions.owned.is_empty() {
        return Ok(None);
    }

    let sa_name = service_account_name(csv);
    let mut last_fingerprint = None;

    for owned in &csv.spec.apiservicedefinitions.owned {
        let service_name = format!("{}-service", owned.name);
        let cert = certs::generate(&service_name, namespace)?;
        let fingerprint = certs::fingerprint(&cert);
        last_fingerprint = Some(fingerprint);

        let secret_api: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let secret = resources::api_service_cert_secret(owned, namespace, cert.cert_pem.clone(), cert.key_pem.clone(), owner.clone());
        secret_api
            .patch(
                &format!("{}-cert", owned.name),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await?;

        let svc_api: Api<Service> = Api::namespaced(client.clone(), namespace);
        let selector = crate::labels::owner_labels(&owner.name, namespace);
        let svc = resources::api_service_front_service(owned, namespace, selector, owner.clone());
        svc_api
            .patch(&service_name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&svc))
            .await?;

        let apisvc_api: Api<APIService> = Api::all(client.clone());
        let apisvc = resources::api_service(owned, &service_name, namespace, cert.ca_bundle.clone(), owner.clone());
        apisvc_api
            .patch(&owned.name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&apisvc))
            .await?;
    }

    let delegator_api: Api<ClusterRoleBinding> = Api::all(client.clone());
    let delegator = resources::auth_delegator_binding(&owner.name, namespace, &sa_name, owner.clone());
    delegator_api
        .patch(
            delegator.metadata.name.as_deref().unwrap_or_default(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&delegator),
        )
        .await?;

    let reader_api: Api<RoleBinding> = Api::namespaced(client.clone(), "kube-system");
    let reader = resources::extension_apiserver_auth_reader_binding(&owner.name, namespace, &sa_name, owner.clone());
    reader_api
        .patch(
            reader.metadata.name.as_deref().unwrap_or_default(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&reader),
        )
        .await?;

    Ok(last_fingerprint)
}

/// Whether the cluster's API server satisfies the CSV's `min_kube_version`, if
/// declared. Network/parse failures are treated as satisfied — min-version gating
/// is a soft admission check, not something worth blocking an install over a
/// transient version-endpoint hiccup.
pub async fn min_kube_version_satisfied(client: &Client, csv: &ClusterServiceVersion) -> bool {
    let Some(min) = &csv.spec.min_kube_version else {
        return true;
    };
    let Ok(info) = client.apiserver_version().await else {
        return true;
    };
    let Ok(min_version) = semver::Version::parse(min.trim_start_matches('v')) else {
        return true;
    };
    let cluster_version_str = format!("{}.{}.0", info.major.trim_end_matches('+'), info.minor.trim_end_matches('+'));
    match semver::Version::parse(&cluster_version_str) {
        Ok(cluster_version) => cluster_version >= min_version,
        Err(_) => true,
    }
}
