//! Conflict detection (spec §4.3 step 3) and `replaces`-graph cycle detection
//! (spec §9 "treat cycles as `DependencyConflict` at resolve time (cycle detection
//! via colored-DFS across the resolution set)").

use std::collections::HashMap;

use crate::cache::ClusterSnapshot;
use crate::catalog::Bundle;
use crate::error::{Error, Result};
use crate::types::GvkRef;

/// §4.3 step 3: at most one CSV in the final resolution set may own a given CRD or
/// APIService, and a pre-existing owner in the cluster that is *not* being replaced
/// by one of the selected bundles blocks the resolution.
pub fn check_owner_conflicts(selected: &[Bundle], snapshot: &ClusterSnapshot) -> Result<()> {
    let mut owners: HashMap<GvkRef, String> = HashMap::new();

    for bundle in selected {
        let mut claims: Vec<GvkRef> = bundle
            .owned_crds
            .iter()
            .map(|c| GvkRef {
                group: c.group.clone(),
                version: c.version.clone(),
                kind: c.kind.clone(),
            })
            .collect();
        claims.extend(bundle.owned_api_services.iter().cloned());

        for gvk in claims {
            if let Some(existing) = owners.get(&gvk) {
                if *existing != bundle.csv_name {
                    return Err(Error::DependencyConflict(format!(
                        "both {} and {} own {:?}",
                        existing, bundle.csv_name, gvk
                    )));
                }
            } else {
                owners.insert(gvk.clone(), bundle.csv_name.clone());
            }

            if let Some(cluster_owner) = snapshot.find_owner(&gvk) {
                let cluster_owner_name = cluster_owner.metadata.name.as_deref().unwrap_or_default();
                // A pre-existing owner still already installed (not itself part of
                // this resolution — it's reconciled separately and only leaves
                // Replacing→Deleting later) is not a conflict when `bundle` names it
                // as a predecessor via `replaces`/`skips`; this is the common
                // owned-CRD/APIService upgrade path, not a collision.
                let is_predecessor = bundle.replaces.as_deref() == Some(cluster_owner_name)
                    || bundle.skips.iter().any(|s| s == cluster_owner_name);
                if cluster_owner_name != bundle.csv_name
                    && !is_predecessor
                    && !selected.iter().any(|b| b.csv_name == cluster_owner_name)
                {
                    return Err(Error::DependencyConflict(format!(
                        "{} is already owned on-cluster by {} and is not being replaced",
                        bundle.csv_name, cluster_owner_name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Colored-DFS cycle check over the `replaces` edges among the selected bundles.
pub fn check_replaces_cycles(selected: &[Bundle]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let by_name: HashMap<&str, &Bundle> = selected.iter().map(|b| (b.csv_name.as_str(), b)).collect();
    let mut colors: HashMap<&str, Color> = selected.iter().map(|b| (b.csv_name.as_str(), Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        by_name: &HashMap<&'a str, &'a Bundle>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<()> {
        match colors.get(node) {
            Some(Color::Black) | None => return Ok(()),
            Some(Color::Gray) => {
                return Err(Error::DependencyConflict(format!(
                    "cycle detected in replaces graph at {node}"
                )))
            }
            Some(Color::White) => {}
        }
        colors.insert(node, Color::Gray);
        if let Some(bundle) = by_name.get(node) {
            if let Some(predecessor) = &bundle.replaces {
                visit(predecessor, by_name, colors)?;
            }
        }
        colors.insert(node, Color::Black);
        Ok(())
    }

    for name in by_name.keys() {
        visit(name, &by_name, &mut colors)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterSnapshot;
    use crate::types::{ClusterServiceVersion, ClusterServiceVersionSpec, CrdRequirements, InstallStrategySpec};
    use semver::Version;

    fn bundle(name: &str, replaces: Option<&str>) -> Bundle {
        Bundle {
            package_name: "nginx".into(),
            channel_name: "stable".into(),
            csv_name: name.into(),
            version: Version::parse("0.1.0").unwrap(),
            replaces: replaces.map(str::to_string),
            skips: Vec::new(),
            owned_crds: Vec::new(),
            owned_crd_manifests: Vec::new(),
            required_crds: Vec::new(),
            required_api_services: Vec::new(),
            owned_api_services: Vec::new(),
            csv: ClusterServiceVersion::new(
                name,
                ClusterServiceVersionSpec {
                    version: "0.1.0".into(),
                    replaces: replaces.map(str::to_string),
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
            catalog_priority: 0,
            catalog_source_name: "a".into(),
            catalog_source_namespace: "olm".into(),
        }
    }

    #[test]
    fn acyclic_chain_passes() {
        let selected = vec![bundle("v2", Some("v1")), bundle("v1", None)];
        assert!(check_replaces_cycles(&selected).is_ok());
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let selected = vec![bundle("v1", Some("v2")), bundle("v2", Some("v1"))];
        assert!(check_replaces_cycles(&selected).is_err());
    }

    fn gvk() -> GvkRef {
        GvkRef {
            group: "example.com".into(),
            version: "v1".into(),
            kind: "Widget".into(),
        }
    }

    fn bundle_owning(name: &str, replaces: Option<&str>, skips: Vec<String>) -> Bundle {
        let mut b = bundle(name, replaces);
        b.skips = skips;
        b.owned_crds = vec![crate::types::OwnedCrd {
            name: "widgets.example.com".into(),
            group: gvk().group,
            version: gvk().version,
            kind: gvk().kind,
            plural: "widgets".into(),
        }];
        b
    }

    fn snapshot_with_owner(owner_csv_name: &str) -> ClusterSnapshot {
        let owner_key = ("ns".to_string(), owner_csv_name.to_string());
        let mut cluster_csvs = HashMap::new();
        cluster_csvs.insert(
            owner_key.clone(),
            ClusterServiceVersion::new(
                owner_csv_name,
                ClusterServiceVersionSpec {
                    version: "0.1.0".into(),
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
        );
        let mut csvs_by_owned_crd = HashMap::new();
        csvs_by_owned_crd.insert(gvk(), owner_key);

        ClusterSnapshot {
            namespace: "ns".into(),
            csvs_by_name: HashMap::new(),
            cluster_csvs,
            csvs_by_owned_crd,
            csvs_by_owned_api_service: HashMap::new(),
            crds: HashMap::new(),
            api_services: HashMap::new(),
            subscriptions: HashMap::new(),
            operator_group: None,
            target_namespaces: vec!["ns".into()],
        }
    }

    #[test]
    fn upgrade_over_replaced_predecessor_is_not_a_conflict() {
        let selected = vec![bundle_owning("v2", Some("v1"), Vec::new())];
        let snapshot = snapshot_with_owner("v1");
        assert!(check_owner_conflicts(&selected, &snapshot).is_ok());
    }

    #[test]
    fn upgrade_over_skipped_predecessor_is_not_a_conflict() {
        let selected = vec![bundle_owning("v2", None, vec!["v1".to_string()])];
        let snapshot = snapshot_with_owner("v1");
        assert!(check_owner_conflicts(&selected, &snapshot).is_ok());
    }

    #[test]
    fn unreplaced_cluster_owner_is_a_conflict() {
        let selected = vec![bundle_owning("v2", Some("other"), Vec::new())];
        let snapshot = snapshot_with_owner("v1");
        let err = check_owner_conflicts(&selected, &snapshot).unwrap_err();
        assert!(err.to_string().contains("already owned on-cluster"));
    }
}
