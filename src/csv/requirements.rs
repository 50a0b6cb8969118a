//! `Pending` requirement checks (spec §4.6): required CRDs served, required
//! APIServices registered, and OperatorGroup install-mode support. Min-k8s-version
//! is checked separately against the live API server version since it needs a
//! client call the other checks don't.

use crate::cache::ClusterSnapshot;
use crate::types::{ClusterServiceVersion, InstallModeType, OperatorGroup};

/// One unmet requirement, carrying enough detail for the `RequirementsNotMet`
/// condition message (spec §7 "a specific missing GVK").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unmet {
    Crd { group: String, version: String, kind: String },
    ApiService { group: String, version: String, kind: String },
    InstallMode(InstallModeType),
}

impl std::fmt::Display for Unmet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unmet::Crd { group, version, kind } => {
                write!(f, "required CRD {kind}.{version}.{group} is not served")
            }
            Unmet::ApiService { group, version, kind } => {
                write!(f, "required APIService {version}.{group} ({kind}) is not registered")
            }
            Unmet::InstallMode(mode) => {
                write!(f, "OperatorGroup does not support install mode {mode:?}")
            }
        }
    }
}

/// Evaluates every requirement named in spec §4.6 `Pending`, returning the ones
/// not currently met. An empty result means the CSV may advance to `InstallReady`.
pub fn unmet_requirements(
    csv: &ClusterServiceVersion,
    snapshot: &ClusterSnapshot,
    own_namespace: &str,
) -> Vec<Unmet> {
    let mut unmet = Vec::new();

    for gvk in &csv.spec.customresourcedefinitions.required {
        if !snapshot.crd_satisfied(gvk) {
            unmet.push(Unmet::Crd {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
            });
        }
    }

    for gvk in &csv.spec.apiservicedefinitions.required {
        if !snapshot.api_service_satisfied(gvk) {
            unmet.push(Unmet::ApiService {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
            });
        }
    }

    if let Some(mode) = unsupported_install_mode(csv, snapshot.operator_group.as_ref(), own_namespace) {
        unmet.push(Unmet::InstallMode(mode));
    }

    unmet
}

/// Returns `Some(mode)` when the namespace's OperatorGroup implies an install mode
/// the CSV doesn't declare as `supported: true`. A CSV with no `install_modes` at
/// all declares support for nothing, so it blocks on whatever mode is implied.
fn unsupported_install_mode(
    csv: &ClusterServiceVersion,
    operator_group: Option<&OperatorGroup>,
    own_namespace: &str,
) -> Option<InstallModeType> {
    let implied = match operator_group {
        Some(og) => og.spec.install_mode(own_namespace),
        None => InstallModeType::OwnNamespace,
    };
    let supported = csv
        .spec
        .install_modes
        .iter()
        .any(|m| m.type_ == implied && m.supported);
    if supported { None } else { Some(implied) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GvkRef, InstallModeSpec};

    #[test]
    fn missing_crd_is_reported() {
        let gvk = GvkRef {
            group: "example.com".into(),
            version: "v1".into(),
            kind: "Widget".into(),
        };
        let unmet = Unmet::Crd {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        };
        assert!(unmet.to_string().contains("Widget"));
    }

    #[test]
    fn own_namespace_mode_supported_passes() {
        let modes = vec![InstallModeSpec {
            type_: InstallModeType::OwnNamespace,
            supported: true,
        }];
        let supported = modes.iter().any(|m| m.type_ == InstallModeType::OwnNamespace && m.supported);
        assert!(supported);
    }
}
