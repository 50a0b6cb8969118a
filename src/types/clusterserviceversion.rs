use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The central installable unit (spec §3 "ClusterServiceVersion (CSV)").
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    shortname = "csv",
    namespaced
)]
#[kube(status = "ClusterServiceVersionStatus")]
pub struct ClusterServiceVersionSpec {
    /// Semver string; parsed with `semver::Version` by the resolver's tie-break rule.
    pub version: String,
    /// Name of the predecessor CSV this one supersedes, if any.
    #[serde(default)]
    pub replaces: Option<String>,
    /// CSV names this one supersedes transitively without a direct `replaces` edge.
    #[serde(default)]
    pub skips: Vec<String>,
    #[serde(default)]
    pub min_kube_version: Option<String>,
    #[serde(default)]
    pub install_modes: Vec<InstallModeSpec>,
    pub customresourcedefinitions: CrdRequirements,
    #[serde(default)]
    pub apiservicedefinitions: ApiServiceRequirements,
    #[serde(default)]
    pub permissions: Vec<PermissionSpec>,
    #[serde(default)]
    pub cluster_permissions: Vec<PermissionSpec>,
    pub install: InstallStrategySpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct CrdRequirements {
    #[serde(default)]
    pub owned: Vec<OwnedCrd>,
    #[serde(default)]
    pub required: Vec<GvkRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ApiServiceRequirements {
    #[serde(default)]
    pub owned: Vec<OwnedApiService>,
    #[serde(default)]
    pub required: Vec<GvkRef>,
}

/// Invariant (spec §3): a CSV's owned CRDs are declared with exactly one version,
/// so unlike a real CRD's `spec.versions[]` this carries a single `version` field.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct OwnedCrd {
    pub name: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct OwnedApiService {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// e.g. `v1alpha1.hats.<suffix>.redhat.com`, the APIService object name.
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub struct GvkRef {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum InstallModeType {
    OwnNamespace,
    SingleNamespace,
    MultiNamespace,
    AllNamespaces,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct InstallModeSpec {
    #[serde(rename = "type")]
    pub type_: InstallModeType,
    pub supported: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct PermissionSpec {
    pub service_account_name: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct PolicyRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

/// The CSV's `install` strategy; OLM supports only `deployment` in practice.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct InstallStrategySpec {
    pub strategy: String,
    pub deployments: Vec<DeploymentSpecRef>,
}

/// A named deployment spec embedded in the CSV, serialized as-is and deserialized
/// by the step executor directly into `k8s_openapi::api::apps::v1::DeploymentSpec`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct DeploymentSpecRef {
    pub name: String,
    pub spec: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ClusterServiceVersionStatus {
    pub phase: CsvPhase,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<CsvCondition>,
    /// Setting this to "now" forces cert-rotation recomputation on the next pass
    /// (spec §4.6 "Cert rotation").
    pub certs_rotate_at: Option<String>,
    pub last_ca_sha: Option<String>,
    /// RFC3339 timestamp of the first transition into `Installing`, checked against
    /// the OperatorGroup's bundle-unpack deadline (spec §5) on every pass where the
    /// install strategy is still not ready.
    pub installing_since: Option<String>,
}

/// §4.6 state machine.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum CsvPhase {
    #[default]
    Pending,
    InstallReady,
    Installing,
    Succeeded,
    Failed,
    Replacing,
    Deleting,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct CsvCondition {
    pub phase: CsvPhase,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub last_transition_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_pending() {
        assert_eq!(CsvPhase::default(), CsvPhase::Pending);
    }
}
