//! Step ordering and emission (spec §4.3 steps 4 and 5).

use std::cmp::Ordering;

use crate::catalog::Bundle;
use crate::types::{Step, StepResource, StepStatus};

/// Candidate comparator for dependency-owner selection and channel-head
/// tie-breaking (spec §4.3 step 4): higher semver wins, then higher catalog
/// `priority`, then lexicographic `(catalog name, namespace)`. Returns
/// `Ordering::Greater` when `a` should be preferred over `b`.
pub fn compare_candidates(a: &Bundle, b: &Bundle) -> Ordering {
    a.version
        .cmp(&b.version)
        .then_with(|| a.catalog_priority.cmp(&b.catalog_priority))
        .then_with(|| {
            // Lexicographic (catalog name, namespace) tie-break prefers the
            // *earlier* name/namespace, so reverse the natural string ordering to
            // keep this function's "Greater = preferred" contract consistent.
            (&b.catalog_source_name, &b.catalog_source_namespace)
                .cmp(&(&a.catalog_source_name, &a.catalog_source_namespace))
        })
}

/// Picks the preferred bundle among multiple owners of the same requirement,
/// per the tie-break rule above.
pub fn pick_best<'a>(candidates: &'a [Bundle]) -> Option<&'a Bundle> {
    candidates
        .iter()
        .max_by(|a, b| compare_candidates(a, b))
}

pub struct SynthesizedSubscription {
    pub name: String,
    pub namespace: String,
    pub package_name: String,
    pub channel_name: String,
    pub catalog_source_name: String,
    pub catalog_source_namespace: String,
}

/// Synthesized owned-subscription naming rule (spec §4.3 step 2): `<pkg>-<catalog>-<ns>`.
pub fn synthesized_subscription_name(pkg: &str, catalog: &str, namespace: &str) -> String {
    format!("{pkg}-{catalog}-{namespace}")
}

/// Emits the step list for one bundle in the fixed order spec §4.3 step 5 names:
/// owned CRDs, then (owned subscriptions are emitted once per resolution, not per
/// bundle — see `emit_all`), then the CSV itself, then its permissions materialized
/// as RBAC steps.
fn emit_bundle_steps(bundle: &Bundle, namespace: &str) -> Vec<Step> {
    let mut steps = Vec::new();

    for owned in &bundle.owned_crds {
        // Prefer the full manifest fetched from the catalog (needed for the
        // safe-upgrade check's spec.versions[]); fall back to the CSV's bare
        // name/group/version/kind reference when the catalog backend didn't supply one.
        let manifest = bundle
            .owned_crd_manifests
            .iter()
            .find(|crd| crd.metadata.name.as_deref() == Some(owned.name.as_str()))
            .map(|crd| serde_json::to_string(crd).unwrap_or_default())
            .unwrap_or_else(|| serde_json::to_string(owned).unwrap_or_default());

        steps.push(Step {
            resource: StepResource {
                group: "apiextensions.k8s.io".to_string(),
                version: "v1".to_string(),
                kind: "CustomResourceDefinition".to_string(),
                name: owned.name.clone(),
                namespace: String::new(),
                manifest,
            },
            catalog_source_name: bundle.catalog_source_name.clone(),
            catalog_source_namespace: bundle.catalog_source_namespace.clone(),
            status: StepStatus::Unknown,
            first_attempted_at: None,
        });
    }

    steps.push(Step {
        resource: StepResource {
            group: "operators.coreos.com".to_string(),
            version: "v1alpha1".to_string(),
            kind: "ClusterServiceVersion".to_string(),
            name: bundle.csv_name.clone(),
            namespace: namespace.to_string(),
            manifest: serde_json::to_string(&bundle.csv).unwrap_or_default(),
        },
        catalog_source_name: bundle.catalog_source_name.clone(),
        catalog_source_namespace: bundle.catalog_source_namespace.clone(),
        status: StepStatus::Unknown,
        first_attempted_at: None,
    });

    for perm in &bundle.csv.spec.permissions {
        steps.push(rbac_step(bundle, namespace, "ServiceAccount", &perm.service_account_name, perm));
        steps.push(rbac_step(bundle, namespace, "Role", &format!("{}-role", bundle.csv_name), perm));
        steps.push(rbac_step(bundle, namespace, "RoleBinding", &format!("{}-rolebinding", bundle.csv_name), perm));
    }
    for perm in &bundle.csv.spec.cluster_permissions {
        steps.push(rbac_step(bundle, namespace, "ServiceAccount", &perm.service_account_name, perm));
        steps.push(rbac_step(bundle, namespace, "ClusterRole", &format!("{}-clusterrole", bundle.csv_name), perm));
        steps.push(rbac_step(bundle, namespace, "ClusterRoleBinding", &format!("{}-clusterrolebinding", bundle.csv_name), perm));
    }

    steps
}

fn rbac_step(
    bundle: &Bundle,
    namespace: &str,
    kind: &str,
    name: &str,
    perm: &crate::types::PermissionSpec,
) -> Step {
    Step {
        resource: StepResource {
            group: "rbac.authorization.k8s.io".to_string(),
            version: "v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: if kind == "ClusterRole" || kind == "ClusterRoleBinding" {
                String::new()
            } else {
                namespace.to_string()
            },
            manifest: serde_json::to_string(perm).unwrap_or_default(),
        },
        catalog_source_name: bundle.catalog_source_name.clone(),
        catalog_source_namespace: bundle.catalog_source_namespace.clone(),
        status: StepStatus::Unknown,
        first_attempted_at: None,
    }
}

fn subscription_step(sub: &SynthesizedSubscription) -> Step {
    Step {
        resource: StepResource {
            group: "operators.coreos.com".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Subscription".to_string(),
            name: sub.name.clone(),
            namespace: sub.namespace.clone(),
            manifest: serde_json::json!({
                "catalogSource": sub.catalog_source_name,
                "catalogSourceNamespace": sub.catalog_source_namespace,
                "packageName": sub.package_name,
                "channel": sub.channel_name,
                "installPlanApproval": "Automatic",
            })
            .to_string(),
        },
        catalog_source_name: sub.catalog_source_name.clone(),
        catalog_source_namespace: sub.catalog_source_namespace.clone(),
        status: StepStatus::Unknown,
        first_attempted_at: None,
    }
}

/// Emits the full step list for a resolution: one subscription step per
/// synthesized dependency, followed by each selected bundle's steps in the order
/// bundles were discovered (seed subscriptions' targets first, then the
/// dependencies they pulled in).
pub fn emit_all(
    bundles: &[Bundle],
    synthesized: &[SynthesizedSubscription],
    namespace: &str,
) -> Vec<Step> {
    let mut steps: Vec<Step> = synthesized.iter().map(subscription_step).collect();
    for bundle in bundles {
        steps.extend(emit_bundle_steps(bundle, namespace));
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterServiceVersion, ClusterServiceVersionSpec, CrdRequirements, InstallStrategySpec};
    use semver::Version;

    fn bundle(version: &str, priority: i32, catalog: &str) -> Bundle {
        Bundle {
            package_name: "nginx".into(),
            channel_name: "stable".into(),
            csv_name: format!("nginx-{version}"),
            version: Version::parse(version).unwrap(),
            replaces: None,
            skips: Vec::new(),
            owned_crds: Vec::new(),
            owned_crd_manifests: Vec::new(),
            required_crds: Vec::new(),
            required_api_services: Vec::new(),
            owned_api_services: Vec::new(),
            csv: ClusterServiceVersion::new(
                "x",
                ClusterServiceVersionSpec {
                    version: version.into(),
                    replaces: None,
                    skips: Vec::new(),
                    min_kube_version: None,
                    install_modes: Vec::new(),
                    customresourcedefinitions: CrdRequirements::default(),
                    apiservicedefinitions: Default::default(),
                    permissions: Vec::new(),
                    cluster_permissions: Vec::new(),
                    install: InstallStrategySpec {
                        strategy: "deployment".into(),
                        deployments: Vec::new(),
                    },
                },
            ),
            catalog_priority: priority,
            catalog_source_name: catalog.into(),
            catalog_source_namespace: "olm".into(),
        }
    }

    #[test]
    fn higher_semver_wins() {
        let low = bundle("0.1.0", 0, "a");
        let high = bundle("0.2.0", 0, "a");
        assert_eq!(compare_candidates(&high, &low), Ordering::Greater);
    }

    #[test]
    fn equal_semver_falls_back_to_priority() {
        let low_prio = bundle("0.1.0", 0, "a");
        let high_prio = bundle("0.1.0", 5, "a");
        assert_eq!(compare_candidates(&high_prio, &low_prio), Ordering::Greater);
    }

    #[test]
    fn equal_semver_and_priority_falls_back_to_catalog_name() {
        let b1 = bundle("0.1.0", 0, "a-catalog");
        let b2 = bundle("0.1.0", 0, "b-catalog");
        // "a-catalog" sorts first lexicographically, so it is preferred.
        assert_eq!(compare_candidates(&b1, &b2), Ordering::Greater);
    }

    #[test]
    fn synthesized_name_matches_convention() {
        assert_eq!(
            synthesized_subscription_name("busybox-dependency", "community", "ns1"),
            "busybox-dependency-community-ns1"
        );
    }
}
