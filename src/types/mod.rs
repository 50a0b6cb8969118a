//! Custom resource types for the `operators.coreos.com` group (spec §6).
//!
//! Each kind follows the same pattern: a `#[derive(CustomResource)]` spec struct
//! plus a plain status struct referenced via `#[kube(status = "...")]`.

pub mod catalogsource;
pub mod clusterserviceversion;
pub mod installplan;
pub mod operatorgroup;
pub mod subscription;

pub use catalogsource::{CatalogSource, CatalogSourceSpec, CatalogSourceStatus, SourceType};
pub use clusterserviceversion::{
    ApiServiceRequirements, ClusterServiceVersion, ClusterServiceVersionSpec,
    ClusterServiceVersionStatus, CrdRequirements, CsvCondition, CsvPhase, DeploymentSpecRef, GvkRef,
    InstallModeSpec, InstallModeType, InstallStrategySpec, OwnedApiService, OwnedCrd,
    PermissionSpec,
};
pub use installplan::{
    ApprovalMode, InstallPlan, InstallPlanCondition, InstallPlanSpec, InstallPlanStatus, Phase,
    Step, StepResource, StepStatus,
};
pub use operatorgroup::{OperatorGroup, OperatorGroupSpec, OperatorGroupStatus};
pub use subscription::{
    Subscription, SubscriptionCondition, SubscriptionSpec, SubscriptionState, SubscriptionStatus,
};
