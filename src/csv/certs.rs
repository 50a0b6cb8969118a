//! Cert rotation plumbing for owned APIServices (spec §4.6 "Cert rotation").
//!
//! Hashes a generated serving certificate's CA bytes via `resources::ca_fingerprint`
//! and stamps the digest on the owning Deployment's pod-template annotation, the
//! same way any content fingerprint forces a rolling update.

use rcgen::{CertifiedKey, generate_simple_self_signed};

use crate::error::{Error, Result};

/// A freshly generated self-signed serving cert for one APIService's aggregated
/// API server, valid for the Service DNS names a cluster routes aggregated API
/// traffic through.
pub struct ServingCert {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
    pub ca_bundle: Vec<u8>,
}

/// Builds the DNS SAN set for `<service>.<namespace>.svc` (the name the
/// aggregated API server's front Service resolves to in-cluster).
pub fn service_dns_names(service_name: &str, namespace: &str) -> Vec<String> {
    vec![
        format!("{service_name}.{namespace}.svc"),
        format!("{service_name}.{namespace}.svc.cluster.local"),
    ]
}

/// Generates a new self-signed serving cert. Owned APIServices are always
/// recreated with a fresh cert (spec §4.5), so this has no "reuse" path — the
/// CSV reconciler calls it once per rotation and stamps the resulting CA-sha
/// onto the deployment's pod template.
pub fn generate(service_name: &str, namespace: &str) -> Result<ServingCert> {
    let names = service_dns_names(service_name, namespace);
    let CertifiedKey { cert, signing_key } =
        generate_simple_self_signed(names).map_err(|e| Error::Other(format!("cert generation failed: {e}")))?;

    let cert_pem = cert.pem().into_bytes();
    let key_pem = signing_key.serialize_pem().into_bytes();
    let ca_bundle = cert_pem.clone();

    Ok(ServingCert {
        cert_pem,
        key_pem,
        ca_bundle,
    })
}

/// The CA-sha fingerprint (spec §4.6) a fresh cert produces; stamped onto the
/// deployment pod template to trigger a rolling update on rotation.
pub fn fingerprint(cert: &ServingCert) -> String {
    crate::resources::ca_fingerprint(&cert.ca_bundle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_names_include_cluster_local_suffix() {
        let names = service_dns_names("nginx-service", "ns1");
        assert!(names.contains(&"nginx-service.ns1.svc".to_string()));
        assert!(names.contains(&"nginx-service.ns1.svc.cluster.local".to_string()));
    }

    #[test]
    fn generated_cert_fingerprint_is_deterministic_for_same_bytes() {
        let cert = generate("svc", "ns1").expect("cert generation");
        let a = fingerprint(&cert);
        let b = crate::resources::ca_fingerprint(&cert.ca_bundle);
        assert_eq!(a, b);
    }
}
