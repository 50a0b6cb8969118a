//! Resolver (C) — spec §4.3. The 35%-share core of the system: turns a namespace's
//! Subscriptions plus the cluster snapshot plus the catalogs they can see into a
//! single `InstallPlan`'s worth of `Step`s.

pub mod conflict;
pub mod steps;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::ResourceExt;

use crate::cache::ClusterSnapshot;
use crate::catalog::{Bundle, CatalogClient};
use crate::error::{Error, Result};
use crate::types::{ApprovalModeField, GvkRef, Subscription};

/// A catalog visible to the namespace being resolved, keyed by `(name, namespace)`.
pub struct CatalogHandle {
    pub name: String,
    pub namespace: String,
    pub client: Arc<dyn CatalogClient>,
}

pub struct ResolutionInput<'a> {
    pub namespace: &'a str,
    pub subscriptions: &'a [Subscription],
    pub snapshot: &'a ClusterSnapshot,
    pub catalogs: &'a [CatalogHandle],
}

pub struct Resolution {
    pub steps: Vec<crate::types::Step>,
    pub requires_approval: bool,
    /// Every bundle selected into this resolution, so a caller can map a
    /// subscription's `package_name` back to the CSV chosen for it.
    pub bundles: Vec<Bundle>,
}

pub async fn resolve(input: ResolutionInput<'_>) -> Result<Resolution> {
    let mut selected: Vec<Bundle> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut synthesized = Vec::new();
    let mut requires_approval = false;

    for sub in input.subscriptions {
        if sub.spec.install_plan_approval == ApprovalModeField::Manual {
            requires_approval = true;
        }

        let catalog = find_catalog(input.catalogs, &sub.spec.catalog_source, &sub.spec.catalog_source_namespace)
            .ok_or_else(|| {
                Error::CatalogUnavailable(format!(
                    "{} has no catalog {}/{} in scope",
                    sub.name_any(),
                    sub.spec.catalog_source_namespace,
                    sub.spec.catalog_source
                ))
            })?;

        let Some(target) = seed(sub, input.snapshot, catalog).await? else {
            continue;
        };

        expand(target, input, &mut selected, &mut synthesized, &mut visited).await?;
    }

    conflict::check_owner_conflicts(&selected, input.snapshot)?;
    conflict::check_replaces_cycles(&selected)?;

    let steps = steps::emit_all(&selected, &synthesized, input.namespace);

    Ok(Resolution {
        steps,
        requires_approval,
        bundles: selected,
    })
}

fn find_catalog<'a>(catalogs: &'a [CatalogHandle], name: &str, namespace: &str) -> Option<&'a CatalogHandle> {
    catalogs
        .iter()
        .find(|c| c.name == name && c.namespace == namespace)
}

/// §4.3 step 1 — seed: pick the target CSV for one subscription.
async fn seed(
    sub: &Subscription,
    snapshot: &ClusterSnapshot,
    catalog: &CatalogHandle,
) -> Result<Option<Bundle>> {
    let pkg = &sub.spec.package_name;
    let channel = &sub.spec.channel;

    let installed = snapshot.subscriptions.get(&sub.name_any()).and_then(|s| s.status.installed_csv.clone());

    if let Some(starting) = &sub.spec.starting_csv {
        let already_installed = installed.as_deref() == Some(starting.as_str())
            || snapshot.csvs_by_name.contains_key(starting);
        if !already_installed {
            return Ok(Some(catalog.client.find_bundle_by_csv_name(pkg, channel, starting).await?));
        }
    }

    if let Some(current) = &installed {
        return catalog
            .client
            .find_replacement(pkg, channel, current)
            .await;
    }

    Ok(Some(catalog.client.find_csv_for_package_under_channel(pkg, channel).await?))
}

/// §4.3 step 2 — expand: walk required CRDs/APIServices, recursively resolving and
/// selecting an owner for each, synthesizing a dependency Subscription when the
/// owner comes from a catalog rather than the cluster.
fn expand<'a>(
    bundle: Bundle,
    input: &'a ResolutionInput<'a>,
    selected: &'a mut Vec<Bundle>,
    synthesized: &'a mut Vec<steps::SynthesizedSubscription>,
    visited: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if visited.contains(&bundle.csv_name) {
            return Ok(());
        }
        visited.insert(bundle.csv_name.clone());

        let mut required: Vec<GvkRef> = bundle.required_crds.clone();
        required.extend(bundle.required_api_services.clone());

        for req in required {
            if input.snapshot.find_owner(&req).is_some() {
                continue; // already satisfied by an installed CSV
            }
            if selected.iter().any(|b| b.owns_gvk(&req)) {
                continue; // already satisfied by another bundle picked up this pass
            }

            let mut candidates = Vec::new();
            for catalog in input.catalogs {
                match catalog
                    .client
                    .find_crd_owner(&req.group, &req.version, &req.kind)
                    .await
                {
                    Ok(owner) => candidates.push((catalog, owner)),
                    Err(Error::PackageNotFound(_)) | Err(Error::AmbiguousOwner(_)) => continue,
                    Err(e) if e.is_transient() => continue,
                    Err(e) => return Err(e),
                }
            }

            let Some((catalog, owner)) = candidates
                .into_iter()
                .max_by(|(_, a), (_, b)| steps::compare_candidates(a, b))
            else {
                return Err(Error::DependencyConflict(format!(
                    "no catalog in scope owns {:?}, required by {}",
                    req, bundle.csv_name
                )));
            };

            let sub_name = steps::synthesized_subscription_name(
                &owner.package_name,
                &catalog.name,
                input.namespace,
            );
            synthesized.push(steps::SynthesizedSubscription {
                name: sub_name,
                namespace: input.namespace.to_string(),
                package_name: owner.package_name.clone(),
                channel_name: owner.channel_name.clone(),
                catalog_source_name: catalog.name.clone(),
                catalog_source_namespace: catalog.namespace.clone(),
            });

            expand(owner, input, selected, synthesized, visited).await?;
        }

        selected.push(bundle);
        Ok(())
    }
    .boxed()
}
