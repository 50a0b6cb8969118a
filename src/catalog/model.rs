//! The package/channel/bundle data model (spec §3).

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::types::{ClusterServiceVersion, GvkRef, OwnedCrd};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Package {
    pub name: String,
    pub default_channel: String,
    /// channel name -> current CSV name
    pub channels: BTreeMap<String, String>,
}

/// One resolvable unit: a CSV plus the metadata the resolver needs without
/// re-parsing the embedded CSV manifest (spec §3 "Package / Channel / Bundle").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bundle {
    pub package_name: String,
    pub channel_name: String,
    pub csv_name: String,
    pub version: Version,
    pub replaces: Option<String>,
    #[serde(default)]
    pub skips: Vec<String>,
    pub owned_crds: Vec<OwnedCrd>,
    pub required_crds: Vec<GvkRef>,
    pub required_api_services: Vec<GvkRef>,
    pub owned_api_services: Vec<GvkRef>,
    /// Full CRD manifests (schema, `spec.versions[]`, served/storage flags) for
    /// each entry in `owned_crds`, sourced from the catalog's `customResourceDefinitions`
    /// key (spec §6) rather than the CSV's own name/group/version/kind reference.
    pub owned_crd_manifests: Vec<CustomResourceDefinition>,
    /// The full CSV object, so the resolver's emitted step can carry the manifest
    /// verbatim (spec §4.3 "steps carry the source catalog ref").
    pub csv: ClusterServiceVersion,
    /// Catalog-priority tie-break field (spec §4.3 step 4).
    pub catalog_priority: i32,
    pub catalog_source_name: String,
    pub catalog_source_namespace: String,
}

impl Bundle {
    pub fn owns_gvk(&self, gvk: &GvkRef) -> bool {
        self.owned_crds
            .iter()
            .any(|c| c.group == gvk.group && c.version == gvk.version && c.kind == gvk.kind)
            || self.owned_api_services.contains(gvk)
    }
}
