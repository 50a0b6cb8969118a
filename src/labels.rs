//! The ownership label contract (spec §6) shared by the executor (E), the CSV
//! reconciler (F), and the CatalogSource controller.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const OWNER: &str = "olm.owner";
pub const OWNER_KIND: &str = "olm.owner.kind";
pub const OWNER_NAMESPACE: &str = "olm.owner.namespace";

pub const CATALOG_SOURCE: &str = "olm.catalogSource";
pub const CONFIGMAP_RESOURCE_VERSION: &str = "olm.configMapResourceVersion";

pub const KIND_CSV: &str = "ClusterServiceVersion";

/// Labels stamped on every resource the executor creates on behalf of a CSV.
pub fn owner_labels(csv_name: &str, namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER.to_string(), csv_name.to_string()),
        (OWNER_KIND.to_string(), KIND_CSV.to_string()),
        (OWNER_NAMESPACE.to_string(), namespace.to_string()),
    ])
}

/// The "adoptable" predicate from spec §4.5: a pre-existing resource may be taken
/// over by a new CSV only if its ownership labels already name that CSV.
pub fn is_adoptable(meta: &ObjectMeta, csv_name: &str, namespace: &str) -> bool {
    let Some(labels) = meta.labels.as_ref() else {
        return false;
    };
    labels.get(OWNER).map(String::as_str) == Some(csv_name)
        && labels.get(OWNER_KIND).map(String::as_str) == Some(KIND_CSV)
        && labels.get(OWNER_NAMESPACE).map(String::as_str) == Some(namespace)
}

/// True when `meta`'s owner labels point at a CSV/namespace pair that no longer
/// exists. Driven by the orphan sweep named in spec §4.5.
pub fn owner_ref(meta: &ObjectMeta) -> Option<(String, String)> {
    let labels = meta.labels.as_ref()?;
    let owner = labels.get(OWNER)?.clone();
    let ns = labels.get(OWNER_NAMESPACE)?.clone();
    Some((owner, ns))
}

pub fn catalog_source_labels(catalog_source: &str, configmap_resource_version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CATALOG_SOURCE.to_string(), catalog_source.to_string()),
        (
            CONFIGMAP_RESOURCE_VERSION.to_string(),
            configmap_resource_version.to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }
    }

    #[test]
    fn adoptable_requires_all_three_labels_to_match() {
        let meta = meta_with(owner_labels("nginx-stable", "ns1"));
        assert!(is_adoptable(&meta, "nginx-stable", "ns1"));
        assert!(!is_adoptable(&meta, "nginx-stable", "ns2"));
        assert!(!is_adoptable(&meta, "other-csv", "ns1"));
    }

    #[test]
    fn non_adoptable_without_labels() {
        let meta = ObjectMeta::default();
        assert!(!is_adoptable(&meta, "nginx-stable", "ns1"));
    }
}
