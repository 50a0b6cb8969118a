//! gRPC-backed Catalog Client (spec §4.1, §6 "a gRPC service at `address:50051`").
//!
//! Talks to an already-running registry pod (or an address-only endpoint configured
//! directly on the `CatalogSource`); the registry pod's own implementation is out of
//! this crate's scope (spec §1). Generated client stubs come from
//! `proto/registry.proto` via `tonic-build` (see `build.rs`).

use std::collections::HashMap;

use async_trait::async_trait;
use semver::Version;
use tonic::transport::Channel;
use tonic::Request;

use crate::catalog::client::CatalogClient;
use crate::catalog::model::Bundle;
use crate::error::{Error, Result};
use crate::types::{ClusterServiceVersion, GvkRef};

pub mod pb {
    tonic::include_proto!("registry.api");
}

use pb::registry_client::RegistryClient;

pub struct GrpcCatalogClient {
    address: String,
    catalog_source_name: String,
    catalog_source_namespace: String,
    priority: i32,
}

impl GrpcCatalogClient {
    pub fn new(
        address: impl Into<String>,
        catalog_source_name: impl Into<String>,
        catalog_source_namespace: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            address: address.into(),
            catalog_source_name: catalog_source_name.into(),
            catalog_source_namespace: catalog_source_namespace.into(),
            priority,
        }
    }

    async fn connect(&self) -> Result<RegistryClient<Channel>> {
        let endpoint = format!("http://{}", self.address);
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| Error::CatalogUnavailable(e.to_string()))?
            .connect_lazy();
        Ok(RegistryClient::new(channel))
    }

    fn bundle_from_wire(&self, pkg: &str, channel: &str, wire: pb::Bundle) -> Result<Bundle> {
        let csv: ClusterServiceVersion = serde_json::from_str(&wire.csv_json)?;
        let version = Version::parse(&wire.version)?;
        Ok(Bundle {
            package_name: pkg.to_string(),
            channel_name: channel.to_string(),
            csv_name: wire.csv_name,
            version,
            replaces: if wire.replaces.is_empty() {
                None
            } else {
                Some(wire.replaces)
            },
            skips: wire.skips,
            owned_crds: csv.spec.customresourcedefinitions.owned.clone(),
            // The registry wire format doesn't carry full CRD manifests alongside the
            // bundle, only the CSV's owned/required references; a gRPC-backed catalog
            // can't service the safe-upgrade check without a separate manifest fetch.
            owned_crd_manifests: Vec::new(),
            required_crds: csv.spec.customresourcedefinitions.required.clone(),
            required_api_services: csv.spec.apiservicedefinitions.required.clone(),
            owned_api_services: csv
                .spec
                .apiservicedefinitions
                .owned
                .iter()
                .map(|a| GvkRef {
                    group: a.group.clone(),
                    version: a.version.clone(),
                    kind: a.kind.clone(),
                })
                .collect(),
            csv,
            catalog_priority: self.priority,
            catalog_source_name: self.catalog_source_name.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
        })
    }

    fn transient(e: tonic::Status) -> Error {
        Error::CatalogUnavailable(e.to_string())
    }
}

#[async_trait]
impl CatalogClient for GrpcCatalogClient {
    async fn list_packages(&self) -> Result<Vec<String>> {
        let mut client = self.connect().await?;
        let mut stream = client
            .list_packages(Request::new(pb::ListPackageRequest {}))
            .await
            .map_err(Self::transient)?
            .into_inner();

        let mut names = Vec::new();
        while let Some(p) = stream.message().await.map_err(Self::transient)? {
            names.push(p.name);
        }
        Ok(names)
    }

    async fn find_csv_for_package_under_channel(&self, pkg: &str, channel: &str) -> Result<Bundle> {
        let mut client = self.connect().await?;
        let resp = client
            .get_bundle_for_channel(Request::new(pb::GetBundleForChannelRequest {
                pkg_name: pkg.to_string(),
                channel_name: channel.to_string(),
            }))
            .await
            .map_err(|e| {
                if e.code() == tonic::Code::NotFound {
                    Error::ChannelNotFound {
                        package: pkg.to_string(),
                        channel: channel.to_string(),
                    }
                } else {
                    Self::transient(e)
                }
            })?
            .into_inner();
        self.bundle_from_wire(pkg, channel, resp)
    }

    async fn find_replacement(
        &self,
        pkg: &str,
        channel: &str,
        current_csv: &str,
    ) -> Result<Option<Bundle>> {
        let mut client = self.connect().await?;
        match client
            .get_replacement(Request::new(pb::GetReplacementRequest {
                pkg_name: pkg.to_string(),
                channel_name: channel.to_string(),
                csv_name: current_csv.to_string(),
            }))
            .await
        {
            Ok(resp) => Ok(Some(self.bundle_from_wire(pkg, channel, resp.into_inner())?)),
            Err(e) if e.code() == tonic::Code::NotFound => Ok(None),
            Err(e) => Err(Self::transient(e)),
        }
    }

    async fn find_crd_owner(&self, group: &str, version: &str, kind: &str) -> Result<Bundle> {
        // The registry protocol doesn't expose a dedicated CRD-owner query; mirror
        // `configmap.rs`'s approach of walking every package's channel head and
        // checking what it owns.
        let target = GvkRef {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        };
        let package_names = self.list_packages().await?;
        let mut client = self.connect().await?;
        let mut by_package: HashMap<String, Bundle> = HashMap::new();

        for pkg_name in package_names {
            let package = client
                .get_package(Request::new(pb::GetPackageRequest {
                    name: pkg_name.clone(),
                }))
                .await
                .map_err(Self::transient)?
                .into_inner();

            let channel_name = if !package.default_channel_name.is_empty() {
                package.default_channel_name.clone()
            } else if let Some(ch) = package.channels.first() {
                ch.name.clone()
            } else {
                continue;
            };

            let bundle = self
                .find_csv_for_package_under_channel(&pkg_name, &channel_name)
                .await?;
            if bundle.owns_gvk(&target) {
                by_package.insert(pkg_name, bundle);
            }
        }

        match by_package.len() {
            0 => Err(Error::PackageNotFound(format!("{group}/{version} {kind}"))),
            1 => Ok(by_package.into_values().next().unwrap()),
            _ => Err(Error::AmbiguousOwner(format!("{group}/{version} {kind}"))),
        }
    }

    async fn find_bundle_by_csv_name(
        &self,
        pkg: &str,
        channel: &str,
        csv_name: &str,
    ) -> Result<Bundle> {
        let mut client = self.connect().await?;
        let resp = client
            .get_bundle(Request::new(pb::GetBundleRequest {
                pkg_name: pkg.to_string(),
                channel_name: channel.to_string(),
                csv_name: csv_name.to_string(),
            }))
            .await
            .map_err(|e| {
                if e.code() == tonic::Code::NotFound {
                    // A named `startingCSV` absent from the catalog is a resolution
                    // failure (spec §8 scenario 3), distinct from an unknown package.
                    Error::DependencyConflict(format!(
                        "starting CSV {csv_name} not found in any catalog for package {pkg}"
                    ))
                } else {
                    Self::transient(e)
                }
            })?
            .into_inner();
        self.bundle_from_wire(pkg, channel, resp)
    }
}
