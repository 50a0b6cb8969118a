//! Builders for the resources a CSV owns (spec §4.5, §4.6). Each builder
//! produces a plain struct for the caller to `Patch::Apply`, CSV-driven rather
//! than fixed-shape.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Secret, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule as K8sPolicyRule, Role, RoleBinding, RoleRef,
    Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::{
    APIService, APIServiceSpec, ServiceReference,
};
use k8s_openapi::ByteString;
use sha2::{Digest, Sha256};

use crate::labels::owner_labels;
use crate::types::{DeploymentSpecRef, OwnedApiService, PermissionSpec};

pub const FINALIZER: &str = "clusterserviceversions.operators.coreos.com/finalizer";

/// CA-sha fingerprint for cert rotation (spec §4.6): hashes the serving cert's CA
/// bytes so a rotation produces a new pod-template annotation and a rolling update.
pub fn ca_fingerprint(ca_bundle: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(ca_bundle);
    format!("{:x}", h.finalize())
}

pub fn owner_reference(csv_name: &str, csv_uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "operators.coreos.com/v1alpha1".to_string(),
        kind: "ClusterServiceVersion".to_string(),
        name: csv_name.to_string(),
        uid: csv_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn catalog_source_owner_reference(catsrc_name: &str, catsrc_uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "operators.coreos.com/v1alpha1".to_string(),
        kind: "CatalogSource".to_string(),
        name: catsrc_name.to_string(),
        uid: catsrc_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn service_account(name: &str, namespace: &str, owner: OwnerReference) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn k8s_rules(perm: &PermissionSpec) -> Vec<K8sPolicyRule> {
    perm.rules
        .iter()
        .map(|r| K8sPolicyRule {
            api_groups: Some(r.api_groups.clone()),
            resources: Some(r.resources.clone()),
            verbs: r.verbs.clone(),
            ..Default::default()
        })
        .collect()
}

pub fn role(name: &str, namespace: &str, perm: &PermissionSpec, owner: OwnerReference) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        rules: Some(k8s_rules(perm)),
    }
}

pub fn role_binding(
    name: &str,
    namespace: &str,
    role_name: &str,
    service_account_name: &str,
    owner: OwnerReference,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

pub fn cluster_role(name: &str, namespace: &str, perm: &PermissionSpec, owner: OwnerReference) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        rules: Some(k8s_rules(perm)),
        ..Default::default()
    }
}

pub fn cluster_role_binding(
    name: &str,
    namespace: &str,
    cluster_role_name: &str,
    service_account_name: &str,
    owner: OwnerReference,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role_name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// `system:auth-delegator` ClusterRoleBinding every CSV with an owned APIService
/// needs so the aggregated API server can delegate auth checks (spec §4.6).
pub fn auth_delegator_binding(
    csv_name: &str,
    namespace: &str,
    service_account_name: &str,
    owner: OwnerReference,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{csv_name}-system-auth-delegator")),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: "system:auth-delegator".to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// `extension-apiserver-authentication-reader` RoleBinding in `kube-system` (spec §4.6).
pub fn extension_apiserver_auth_reader_binding(
    csv_name: &str,
    owner_namespace: &str,
    service_account_name: &str,
    owner: OwnerReference,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{csv_name}-auth-reader")),
            namespace: Some("kube-system".to_string()),
            labels: Some(owner_labels(&owner.name, owner_namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: "extension-apiserver-authentication-reader".to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name.to_string(),
            namespace: Some(owner_namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Builds the owned Deployment from the CSV's embedded `DeploymentSpecRef`,
/// stamping the CA-sha annotation (spec §4.6 "Cert rotation") onto the pod
/// template when one is supplied.
pub fn deployment(
    namespace: &str,
    spec_ref: &DeploymentSpecRef,
    ca_sha: Option<&str>,
    owner: OwnerReference,
) -> Result<Deployment, serde_json::Error> {
    let mut spec: DeploymentSpec = serde_json::from_value(spec_ref.spec.clone())?;

    if let Some(sha) = ca_sha {
        let tmpl_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
        let annotations = tmpl_meta.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert("operators.coreos.com/ca-sha".to_string(), sha.to_string());
    }

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(spec_ref.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    })
}

pub fn api_service(
    owned: &OwnedApiService,
    service_name: &str,
    service_namespace: &str,
    ca_bundle: Vec<u8>,
    owner: OwnerReference,
) -> APIService {
    APIService {
        metadata: ObjectMeta {
            name: Some(owned.name.clone()),
            labels: Some(owner_labels(&owner.name, service_namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(APIServiceSpec {
            group: Some(owned.group.clone()),
            version: Some(owned.version.clone()),
            group_priority_minimum: 2000,
            version_priority: 15,
            service: Some(ServiceReference {
                name: Some(service_name.to_string()),
                namespace: Some(service_namespace.to_string()),
                port: Some(443),
            }),
            ca_bundle: Some(ByteString(ca_bundle)),
            insecure_skip_tls_verify: Some(false),
        }),
        status: None,
    }
}

pub fn api_service_cert_secret(
    owned: &OwnedApiService,
    namespace: &str,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    owner: OwnerReference,
) -> Secret {
    let data = BTreeMap::from([
        ("tls.crt".to_string(), ByteString(cert_pem)),
        ("tls.key".to_string(), ByteString(key_pem)),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-cert", owned.name)),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

pub fn api_service_front_service(
    owned: &OwnedApiService,
    namespace: &str,
    selector: BTreeMap<String, String>,
    owner: OwnerReference,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-service", owned.name)),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(&owner.name, namespace)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: 443,
                target_port: Some(IntOrString::Int(5443)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Image wrapping an in-cluster ConfigMap as a queryable gRPC registry (spec §1
/// names the registry binary itself out of scope; this crate only references the
/// external image the way it references any other pulled container).
pub const REGISTRY_IMAGE: &str = "quay.io/operator-framework/configmap-operator-registry:latest";

/// The Pod backing a `sourceType: internal` CatalogSource, mounting the named
/// ConfigMap and serving it over the registry gRPC protocol on 50051 (spec §6
/// "Catalog protocols"). Labeled per spec §6's catalog-source ownership contract
/// so a ConfigMap update (new `resourceVersion`) is detectable as a rollout.
pub fn registry_pod(
    catalog_source_name: &str,
    namespace: &str,
    config_map_name: &str,
    config_map_resource_version: &str,
    owner: OwnerReference,
) -> k8s_openapi::api::core::v1::Pod {
    use k8s_openapi::api::core::v1::{
        ConfigMapVolumeSource, Container, ContainerPort, Pod, PodSpec, Volume, VolumeMount,
    };

    let name = format!("{catalog_source_name}-registry-server");
    let labels = crate::labels::catalog_source_labels(catalog_source_name, config_map_resource_version);

    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "registry-server".to_string(),
                image: Some(REGISTRY_IMAGE.to_string()),
                ports: Some(vec![ContainerPort {
                    container_port: 50051,
                    name: Some("grpc".to_string()),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "catalog-content".to_string(),
                    mount_path: "/registry".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "catalog-content".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The front `Service` exposing a registry pod's gRPC port (spec §6 "a gRPC
/// service at `address:50051`").
pub fn registry_service(
    catalog_source_name: &str,
    namespace: &str,
    config_map_resource_version: &str,
    owner: OwnerReference,
) -> Service {
    let labels = crate::labels::catalog_source_labels(catalog_source_name, config_map_resource_version);
    let mut selector = BTreeMap::new();
    selector.insert(
        crate::labels::CATALOG_SOURCE.to_string(),
        catalog_source_name.to_string(),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(registry_service_name(catalog_source_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: 50051,
                target_port: Some(IntOrString::Int(50051)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn registry_service_name(catalog_source_name: &str) -> String {
    format!("{catalog_source_name}-registry-server")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_ca_bytes() {
        let a = ca_fingerprint(b"cert-a");
        let b = ca_fingerprint(b"cert-b");
        assert_ne!(a, b);
        assert_eq!(a, ca_fingerprint(b"cert-a"));
    }
}
