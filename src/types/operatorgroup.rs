use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::clusterserviceversion::InstallModeType;

/// Declares the tenancy of a namespace (spec §3). Read-only input to the resolver
/// and executor for install-mode admission; this crate does not write its `spec`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    shortname = "og",
    namespaced
)]
#[kube(status = "OperatorGroupStatus")]
pub struct OperatorGroupSpec {
    /// Empty/absent means `AllNamespaces`. A single entry equal to the OperatorGroup's
    /// own namespace means `OwnNamespace`. Otherwise `SingleNamespace`/`MultiNamespace`.
    #[serde(default)]
    pub target_namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// Overrides the default bundle-unpack deadline (spec §5).
    #[serde(
        default,
        rename = "bundleUnpackTimeoutSeconds"
    )]
    pub bundle_unpack_timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct OperatorGroupStatus {
    /// Computed target-namespace set, mirroring `spec.target_namespaces` after
    /// resolving label selectors (selectors themselves are out of this crate's
    /// scope; namespaces are taken as given).
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl OperatorGroupSpec {
    /// Computes which of the four install modes (spec §3 CSV attribute) this
    /// OperatorGroup's target-namespace set satisfies, given the group's own
    /// namespace.
    pub fn install_mode(&self, own_namespace: &str) -> InstallModeType {
        match &self.target_namespaces {
            None => InstallModeType::AllNamespaces,
            Some(targets) if targets.is_empty() => InstallModeType::AllNamespaces,
            Some(targets) if targets.len() == 1 && targets[0] == own_namespace => {
                InstallModeType::OwnNamespace
            }
            Some(targets) if targets.len() == 1 => InstallModeType::SingleNamespace,
            Some(_) => InstallModeType::MultiNamespace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_install_modes() {
        let own = OperatorGroupSpec {
            target_namespaces: Some(vec!["ns1".into()]),
            service_account_name: None,
            bundle_unpack_timeout_seconds: None,
        };
        assert_eq!(own.install_mode("ns1"), InstallModeType::OwnNamespace);

        let single = OperatorGroupSpec {
            target_namespaces: Some(vec!["other".into()]),
            service_account_name: None,
            bundle_unpack_timeout_seconds: None,
        };
        assert_eq!(single.install_mode("ns1"), InstallModeType::SingleNamespace);

        let multi = OperatorGroupSpec {
            target_namespaces: Some(vec!["ns1".into(), "ns2".into()]),
            service_account_name: None,
            bundle_unpack_timeout_seconds: None,
        };
        assert_eq!(multi.install_mode("ns1"), InstallModeType::MultiNamespace);

        let all = OperatorGroupSpec {
            target_namespaces: None,
            service_account_name: None,
            bundle_unpack_timeout_seconds: None,
        };
        assert_eq!(all.install_mode("ns1"), InstallModeType::AllNamespaces);
    }
}
