//! Catalog Client (A) — spec §4.1.

pub mod client;
pub mod configmap;
pub mod grpc;
pub mod model;

pub use client::CatalogClient;
pub use configmap::ConfigMapCatalogClient;
pub use grpc::GrpcCatalogClient;
pub use model::{Bundle, Package};

use std::sync::Arc;

use crate::types::{CatalogSource, SourceType};

/// Builds the right `CatalogClient` impl for a `CatalogSource`, per spec §4.1
/// ("Backed either by an in-cluster ConfigMap ... or an address-only gRPC endpoint").
pub fn client_for(client: kube::Client, source: &CatalogSource) -> Arc<dyn CatalogClient> {
    let name = source.metadata.name.clone().unwrap_or_default();
    let namespace = source.metadata.namespace.clone().unwrap_or_default();
    let priority = source.spec.priority;

    match source.spec.source_type {
        SourceType::Internal => {
            let config_map = source
                .spec
                .config_map
                .clone()
                .unwrap_or_else(|| name.clone());
            Arc::new(ConfigMapCatalogClient::new(
                client,
                namespace.clone(),
                config_map,
                priority,
                name,
                namespace,
            ))
        }
        SourceType::Grpc => {
            let address = source
                .spec
                .address
                .clone()
                .unwrap_or_else(|| format!("{name}.{namespace}.svc:50051"));
            Arc::new(GrpcCatalogClient::new(address, name, namespace, priority))
        }
    }
}
