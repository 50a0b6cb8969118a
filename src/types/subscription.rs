use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares the intent to install and keep a package up to date (spec §3, §6).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    namespaced
)]
#[kube(status = "SubscriptionStatus")]
pub struct SubscriptionSpec {
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    pub package_name: String,
    pub channel: String,
    #[serde(default)]
    pub starting_csv: Option<String>,
    pub install_plan_approval: ApprovalModeField,
}

/// Mirrors `InstallPlan.spec.approval` (see `installplan.rs`); kept as its own type
/// here because the wire field name differs (`installPlanApproval` vs `approval`).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ApprovalModeField {
    #[default]
    Automatic,
    Manual,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SubscriptionStatus {
    pub current_csv: Option<String>,
    pub installed_csv: Option<String>,
    pub install_plan_ref: Option<String>,
    #[serde(default)]
    pub conditions: Vec<SubscriptionCondition>,
    pub state: Option<SubscriptionState>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum SubscriptionState {
    None,
    FailedToCheckCatalogSource,
    UpgradeAvailable,
    UpgradePending,
    AtLatestKnown,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SubscriptionCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}
