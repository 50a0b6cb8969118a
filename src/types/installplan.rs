use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The transactional unit the resolver (C) writes and the state machine (D) and
/// executor (E) advance (spec §3, §4.4).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    namespaced
)]
#[kube(status = "InstallPlanStatus")]
pub struct InstallPlanSpec {
    pub cluster_service_version_names: Vec<String>,
    pub approval: ApprovalMode,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ApprovalMode {
    #[default]
    Automatic,
    Manual,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct InstallPlanStatus {
    pub phase: Phase,
    #[serde(default)]
    pub plan: Vec<Step>,
    #[serde(default)]
    pub conditions: Vec<InstallPlanCondition>,
}

/// §4.4 state machine. `Default` is `Planning`, matching "set by the resolver while
/// computing `Status.Plan`" as the entry state for a freshly created InstallPlan.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Planning,
    RequiresApproval,
    Installing,
    Complete,
    Failed,
}

impl Phase {
    /// `Complete` and `Failed` are the only terminal phases (spec §4.4).
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct InstallPlanCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// One resolved unit of work (spec §3 "Step", §9 "Model a Step as a tagged variant").
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct Step {
    pub resource: StepResource,
    pub catalog_source_name: String,
    pub catalog_source_namespace: String,
    pub status: StepStatus,
    /// RFC3339 timestamp of the first execution attempt, stamped once by the
    /// executor and compared against the step retry deadline (spec §5 "each step
    /// has an overall deadline of 60 seconds").
    #[serde(default)]
    pub first_attempted_at: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub struct StepResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub name: String,
    /// Namespace the step applies to; empty for cluster-scoped kinds.
    #[serde(default)]
    pub namespace: String,
    /// The manifest to apply, serialized as it was fetched from the catalog so the
    /// executor can re-fetch-and-compare without re-querying the catalog (spec §4.3
    /// "steps carry the source catalog ref so the executor can re-fetch bundle data").
    pub manifest: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    Unknown,
    NotPresent,
    Present,
    Created,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_complete_and_failed_are_terminal() {
        assert!(!Phase::Planning.is_terminal());
        assert!(!Phase::RequiresApproval.is_terminal());
        assert!(!Phase::Installing.is_terminal());
        assert!(Phase::Complete.is_terminal());
        assert!(Phase::Failed.is_terminal());
    }
}
