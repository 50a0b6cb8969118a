//! Cluster State Cache (B) — spec §4.2.
//!
//! "A read-through snapshot keyed by namespace." Built fresh at the top of each
//! resolver pass via direct `List` calls (no separate reflector/store machinery);
//! readers tolerate staleness and the executor re-reads immediately before each
//! write, exactly as spec §4.2 specifies.

use std::collections::HashMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use kube::{Api, Client, ResourceExt};

use crate::error::Result;
use crate::labels;
use crate::types::{ClusterServiceVersion, GvkRef, OperatorGroup, Subscription};

#[derive(Debug, Clone)]
pub struct ApiServiceInfo {
    pub name: String,
    /// `(owner_csv, owner_namespace)`, from the ownership labels (spec §6), if present.
    pub owner: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CrdInfo {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub stored_versions: Vec<String>,
    pub served_versions: Vec<String>,
}

/// A point-in-time view of one namespace (plus cluster-scoped resources) for use by
/// the resolver (C) and executor (E).
pub struct ClusterSnapshot {
    pub namespace: String,
    pub csvs_by_name: HashMap<String, ClusterServiceVersion>,
    /// Every installed CSV cluster-wide, keyed by `(namespace, name)`. Ownership
    /// (spec §4.2/§4.3, invariant I3) is a cluster-wide property — a CSV in another
    /// namespace can be the sole owner of a GVK — so conflict/owner lookups must not
    /// be scoped to `namespace`.
    pub(crate) cluster_csvs: HashMap<(String, String), ClusterServiceVersion>,
    pub(crate) csvs_by_owned_crd: HashMap<GvkRef, (String, String)>,
    pub(crate) csvs_by_owned_api_service: HashMap<GvkRef, (String, String)>,
    pub crds: HashMap<String, CrdInfo>,
    pub api_services: HashMap<String, ApiServiceInfo>,
    pub subscriptions: HashMap<String, Subscription>,
    pub operator_group: Option<OperatorGroup>,
    pub target_namespaces: Vec<String>,
}

impl ClusterSnapshot {
    pub async fn load(client: Client, namespace: &str) -> Result<Self> {
        let csv_api: Api<ClusterServiceVersion> = Api::namespaced(client.clone(), namespace);
        let csvs: Vec<ClusterServiceVersion> = csv_api.list(&Default::default()).await?.items;

        let all_csv_api: Api<ClusterServiceVersion> = Api::all(client.clone());
        let all_csvs: Vec<ClusterServiceVersion> = all_csv_api.list(&Default::default()).await?.items;

        let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
        let crds: Vec<CustomResourceDefinition> = crd_api.list(&Default::default()).await?.items;

        let apisvc_api: Api<APIService> = Api::all(client.clone());
        let api_services: Vec<APIService> = apisvc_api.list(&Default::default()).await?.items;

        let sub_api: Api<Subscription> = Api::namespaced(client.clone(), namespace);
        let subscriptions: Vec<Subscription> = sub_api.list(&Default::default()).await?.items;

        let og_api: Api<OperatorGroup> = Api::namespaced(client.clone(), namespace);
        let operator_group = og_api
            .list(&Default::default())
            .await?
            .items
            .into_iter()
            .next();

        let target_namespaces = match &operator_group {
            Some(og) => og
                .spec
                .target_namespaces
                .clone()
                .unwrap_or_else(|| vec![namespace.to_string()]),
            None => vec![namespace.to_string()],
        };

        let csvs_by_name = csvs.into_iter().map(|csv| (csv.name_any(), csv)).collect();

        let mut cluster_csvs = HashMap::new();
        let mut csvs_by_owned_crd = HashMap::new();
        let mut csvs_by_owned_api_service = HashMap::new();

        for csv in all_csvs {
            let name = csv.name_any();
            let ns = csv.namespace().unwrap_or_default();
            let key = (ns, name);
            for owned in &csv.spec.customresourcedefinitions.owned {
                csvs_by_owned_crd.insert(
                    GvkRef {
                        group: owned.group.clone(),
                        version: owned.version.clone(),
                        kind: owned.kind.clone(),
                    },
                    key.clone(),
                );
            }
            for owned in &csv.spec.apiservicedefinitions.owned {
                csvs_by_owned_api_service.insert(
                    GvkRef {
                        group: owned.group.clone(),
                        version: owned.version.clone(),
                        kind: owned.kind.clone(),
                    },
                    key.clone(),
                );
            }
            cluster_csvs.insert(key, csv);
        }

        let crds = crds
            .into_iter()
            .map(|crd| {
                let name = crd.name_any();
                let stored_versions = crd
                    .status
                    .as_ref()
                    .and_then(|s| s.stored_versions.clone())
                    .unwrap_or_default();
                let served_versions = crd
                    .spec
                    .versions
                    .iter()
                    .filter(|v| v.served)
                    .map(|v| v.name.clone())
                    .collect();
                (
                    name.clone(),
                    CrdInfo {
                        name,
                        group: crd.spec.group.clone(),
                        kind: crd.spec.names.kind.clone(),
                        stored_versions,
                        served_versions,
                    },
                )
            })
            .collect();

        let api_services = api_services
            .into_iter()
            .map(|svc| {
                let name = svc.name_any();
                let owner = labels::owner_ref(&svc.metadata);
                (name.clone(), ApiServiceInfo { name, owner })
            })
            .collect();

        let subscriptions = subscriptions
            .into_iter()
            .map(|s| (s.name_any(), s))
            .collect();

        Ok(ClusterSnapshot {
            namespace: namespace.to_string(),
            csvs_by_name,
            cluster_csvs,
            csvs_by_owned_crd,
            csvs_by_owned_api_service,
            crds,
            api_services,
            subscriptions,
            operator_group,
            target_namespaces,
        })
    }

    /// Finds the installed CSV (if any) cluster-wide that owns `gvk`, whether as a
    /// CRD or an APIService requirement (spec §4.3 step 2a). Ownership is a
    /// cluster-wide property (invariant I3), so the owner may live outside
    /// `self.namespace`.
    pub fn find_owner(&self, gvk: &GvkRef) -> Option<&ClusterServiceVersion> {
        self.csvs_by_owned_crd
            .get(gvk)
            .or_else(|| self.csvs_by_owned_api_service.get(gvk))
            .and_then(|key| self.cluster_csvs.get(key))
    }

    pub fn installed_csv_for_package(&self, package_csv_names: &[String]) -> Option<&ClusterServiceVersion> {
        package_csv_names
            .iter()
            .find_map(|name| self.csvs_by_name.get(name))
    }

    /// §4.6 `Pending` requirement: a required CRD must be registered and served.
    pub fn crd_satisfied(&self, gvk: &GvkRef) -> bool {
        self.crds.values().any(|c| {
            c.group == gvk.group
                && c.kind == gvk.kind
                && c.served_versions.iter().any(|v| v == &gvk.version)
        })
    }

    /// §4.6 `Pending` requirement: a required APIService must be registered.
    pub fn api_service_satisfied(&self, gvk: &GvkRef) -> bool {
        let name = format!("{}.{}", gvk.version, gvk.group);
        self.api_services.contains_key(&name)
    }
}

/// Fetches just the namespace's OperatorGroup, for callers that only need its
/// bundle-unpack-timeout override and don't want a full snapshot's worth of `List`
/// calls (spec §5 "overridable per-OperatorGroup via annotation").
pub async fn load_operator_group(client: &Client, namespace: &str) -> Result<Option<OperatorGroup>> {
    let og_api: Api<OperatorGroup> = Api::namespaced(client.clone(), namespace);
    Ok(og_api.list(&Default::default()).await?.items.into_iter().next())
}
