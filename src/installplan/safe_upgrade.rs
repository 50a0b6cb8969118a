//! CRD safe-upgrade check (spec §4.5, invariant I2).

use crate::error::{Error, Result};

/// `stored` is the on-cluster CRD's `status.storedVersions`; `new_versions` is the
/// incoming CRD's `spec.versions[]` names. Every stored version must survive into
/// the new CRD or the upgrade is refused with `CRDUpgradeWouldCauseDataLoss`
/// (message containing the literal substring `risk of data loss`, spec §4.5/I2).
pub fn check_safe_upgrade(crd_name: &str, stored: &[String], new_versions: &[String]) -> Result<()> {
    for version in stored {
        if !new_versions.contains(version) {
            return Err(Error::CrdUpgradeWouldCauseDataLoss {
                crd: crd_name.to_string(),
                version: version.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_when_a_stored_version_is_dropped() {
        let stored = vec!["v1alpha1".to_string(), "v1alpha2".to_string()];
        let new_versions = vec!["v1alpha3".to_string(), "v2alpha2".to_string()];
        let err = check_safe_upgrade("widgets.example.com", &stored, &new_versions).unwrap_err();
        assert!(err.to_string().contains("risk of data loss"));
    }

    #[test]
    fn allows_when_all_stored_versions_survive() {
        let stored = vec!["v1alpha2".to_string()];
        let new_versions = vec!["v1alpha2".to_string(), "v1alpha3".to_string()];
        assert!(check_safe_upgrade("widgets.example.com", &stored, &new_versions).is_ok());
    }

    #[test]
    fn empty_stored_versions_always_allows() {
        assert!(check_safe_upgrade("widgets.example.com", &[], &["v1".to_string()]).is_ok());
    }
}
