//! ConfigMap-backed Catalog Client (spec §4.1, §6 "a ConfigMap with keys
//! `packages`, `customResourceDefinitions`, `clusterServiceVersions` containing
//! YAML lists").

use std::collections::HashMap;

use async_trait::async_trait;
use kube::{Api, Client, ResourceExt};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::catalog::client::{not_found, CatalogClient};
use crate::catalog::model::Bundle;
use crate::error::{Error, Result};
use crate::types::ClusterServiceVersion;

#[derive(Debug, Deserialize, Serialize, Clone)]
struct RawPackage {
    package_name: String,
    default_channel: String,
    channels: Vec<RawChannel>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct RawChannel {
    name: String,
    current_csv_name: String,
}

pub struct ConfigMapCatalogClient {
    client: Client,
    namespace: String,
    config_map_name: String,
    priority: i32,
    catalog_source_name: String,
    catalog_source_namespace: String,
}

impl ConfigMapCatalogClient {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        config_map_name: impl Into<String>,
        priority: i32,
        catalog_source_name: impl Into<String>,
        catalog_source_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            config_map_name: config_map_name.into(),
            priority,
            catalog_source_name: catalog_source_name.into(),
            catalog_source_namespace: catalog_source_namespace.into(),
        }
    }

    async fn load(&self) -> Result<(Vec<RawPackage>, Vec<ClusterServiceVersion>, Vec<CustomResourceDefinition>)> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let cm = api.get(&self.config_map_name).await.map_err(|e| {
            if matches!(&e, kube::Error::Api(r) if r.code == 404) {
                Error::CatalogUnavailable(format!(
                    "configmap {}/{} not found",
                    self.namespace, self.config_map_name
                ))
            } else {
                Error::Kube(e)
            }
        })?;

        let data = cm.data.unwrap_or_default();

        let packages: Vec<RawPackage> = match data.get("packages") {
            Some(yaml) => serde_yaml::from_str(yaml)?,
            None => Vec::new(),
        };

        let csvs: Vec<ClusterServiceVersion> = match data.get("clusterServiceVersions") {
            Some(yaml) => serde_yaml::from_str(yaml)?,
            None => Vec::new(),
        };

        let crds: Vec<CustomResourceDefinition> = match data.get("customResourceDefinitions") {
            Some(yaml) => serde_yaml::from_str(yaml)?,
            None => Vec::new(),
        };

        Ok((packages, csvs, crds))
    }

    fn bundle_from_csv(
        &self,
        package_name: &str,
        channel_name: &str,
        csv: &ClusterServiceVersion,
        crds: &[CustomResourceDefinition],
    ) -> Result<Bundle> {
        let csv_name = csv.metadata.name.clone().unwrap_or_default();
        let version = Version::parse(&csv.spec.version)?;

        let owned_crds = csv.spec.customresourcedefinitions.owned.clone();
        let owned_crd_manifests = owned_crds
            .iter()
            .filter_map(|owned| {
                crds.iter()
                    .find(|crd| crd.name_any() == owned.name)
                    .cloned()
            })
            .collect();

        Ok(Bundle {
            package_name: package_name.to_string(),
            channel_name: channel_name.to_string(),
            csv_name,
            version,
            replaces: csv.spec.replaces.clone(),
            skips: csv.spec.skips.clone(),
            owned_crds,
            owned_crd_manifests,
            required_crds: csv.spec.customresourcedefinitions.required.clone(),
            required_api_services: csv.spec.apiservicedefinitions.required.clone(),
            owned_api_services: csv
                .spec
                .apiservicedefinitions
                .owned
                .iter()
                .map(|a| crate::types::GvkRef {
                    group: a.group.clone(),
                    version: a.version.clone(),
                    kind: a.kind.clone(),
                })
                .collect(),
            csv: csv.clone(),
            catalog_priority: self.priority,
            catalog_source_name: self.catalog_source_name.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
        })
    }
}

#[async_trait]
impl CatalogClient for ConfigMapCatalogClient {
    async fn list_packages(&self) -> Result<Vec<String>> {
        let (packages, _, _) = self.load().await?;
        Ok(packages.into_iter().map(|p| p.package_name).collect())
    }

    async fn find_csv_for_package_under_channel(&self, pkg: &str, channel: &str) -> Result<Bundle> {
        let (packages, csvs, crds) = self.load().await?;
        let package = packages
            .iter()
            .find(|p| p.package_name == pkg)
            .ok_or_else(|| not_found(pkg, None))?;
        let ch = package
            .channels
            .iter()
            .find(|c| c.name == channel)
            .ok_or_else(|| not_found(pkg, Some(channel)))?;
        let csv = csvs
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some(ch.current_csv_name.as_str()))
            .ok_or_else(|| not_found(pkg, Some(channel)))?;
        self.bundle_from_csv(pkg, channel, csv, &crds)
    }

    async fn find_replacement(
        &self,
        pkg: &str,
        channel: &str,
        current_csv: &str,
    ) -> Result<Option<Bundle>> {
        let (_packages, csvs, crds) = self.load().await?;
        let replacement = csvs
            .iter()
            .find(|c| c.spec.replaces.as_deref() == Some(current_csv));
        match replacement {
            Some(csv) => Ok(Some(self.bundle_from_csv(pkg, channel, csv, &crds)?)),
            None => Ok(None),
        }
    }

    async fn find_crd_owner(&self, group: &str, version: &str, kind: &str) -> Result<Bundle> {
        let (packages, csvs, crds) = self.load().await?;
        let mut by_package: HashMap<String, &ClusterServiceVersion> = HashMap::new();

        for csv in &csvs {
            let owns = csv.spec.customresourcedefinitions.owned.iter().any(|c| {
                c.group == group && c.version == version && c.kind == kind
            }) || csv.spec.apiservicedefinitions.owned.iter().any(|a| {
                a.group == group && a.version == version && a.kind == kind
            });
            if !owns {
                continue;
            }
            if let Some(package) = packages.iter().find(|p| {
                p.channels
                    .iter()
                    .any(|c| Some(c.current_csv_name.as_str()) == csv.metadata.name.as_deref())
            }) {
                by_package.insert(package.package_name.clone(), csv);
            }
        }

        match by_package.len() {
            0 => Err(Error::PackageNotFound(format!("{group}/{version} {kind}"))),
            1 => {
                let (pkg_name, csv) = by_package.into_iter().next().unwrap();
                let channel = packages
                    .iter()
                    .find(|p| p.package_name == pkg_name)
                    .and_then(|p| p.channels.iter().find(|c| Some(c.current_csv_name.as_str()) == csv.metadata.name.as_deref()))
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                self.bundle_from_csv(&pkg_name, &channel, csv, &crds)
            }
            _ => Err(Error::AmbiguousOwner(format!("{group}/{version} {kind}"))),
        }
    }

    async fn find_bundle_by_csv_name(
        &self,
        pkg: &str,
        channel: &str,
        csv_name: &str,
    ) -> Result<Bundle> {
        let (_packages, csvs, crds) = self.load().await?;
        // A missing package/channel is `PackageNotFound`/`ChannelNotFound` (§4.1); a
        // named `startingCSV` that simply isn't in any catalog is a resolution
        // failure in its own right (spec §8 scenario 3), not a channel-lookup miss.
        let csv = csvs
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some(csv_name))
            .ok_or_else(|| {
                Error::DependencyConflict(format!(
                    "starting CSV {csv_name} not found in any catalog for package {pkg}"
                ))
            })?;
        self.bundle_from_csv(pkg, channel, csv, &crds)
    }
}
