use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A pointer to a package index (spec §3 "Catalog", §6 `CatalogSource`).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    namespaced
)]
#[kube(status = "CatalogSourceStatus")]
pub struct CatalogSourceSpec {
    pub source_type: SourceType,
    /// Name of the in-cluster ConfigMap backing this source, when `source_type == internal`.
    #[serde(default)]
    pub config_map: Option<String>,
    /// `address:port` of a pre-existing gRPC registry endpoint, when `source_type == grpc`.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub publisher: String,
    /// Tie-break field used by the resolver's ordering rule (spec §4.3 step 4).
    #[serde(default)]
    pub priority: i32,
    /// Poll interval, floor-clamped to `Config::min_catalog_poll_interval`.
    #[serde(default)]
    pub update_strategy_interval_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    Internal,
    Grpc,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct CatalogSourceStatus {
    pub connection_state: Option<String>,
    pub registry_service_name: Option<String>,
    pub last_sync: Option<String>,
    /// Mirrors the ConfigMap's `resourceVersion` at the last successful sync, used
    /// to detect pod-rollout-worthy changes (spec §6 ownership label contract).
    pub config_map_resource_version: Option<String>,
}
