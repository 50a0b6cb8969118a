//! CRD manifest emission for the five `operators.coreos.com` kinds (spec §6).
//! schemars emits a `format` key on some scalar fields that the cluster API
//! server's structural schema validation rejects, so it's stripped before printing.

use kube::CustomResourceExt;

use crate::types::{CatalogSource, ClusterServiceVersion, InstallPlan, OperatorGroup, Subscription};

/// Prints every CRD this crate manages as a `---`-separated YAML stream, the
/// shape `kubectl apply -f` expects.
pub fn print_crds_without_formats() -> anyhow::Result<()> {
    print_one(CatalogSource::crd())?;
    print_one(Subscription::crd())?;
    print_one(InstallPlan::crd())?;
    print_one(ClusterServiceVersion::crd())?;
    print_one(OperatorGroup::crd())?;
    Ok(())
}

fn print_one(crd: k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition) -> anyhow::Result<()> {
    let mut v = serde_json::to_value(&crd)?;
    strip_format_keys(&mut v);
    println!("---");
    println!("{}", serde_yaml::to_string(&v)?);
    Ok(())
}

fn strip_format_keys(v: &mut serde_json::Value) {
    use serde_json::Value::*;
    match v {
        Object(map) => {
            map.remove("format");
            for val in map.values_mut() {
                strip_format_keys(val);
            }
        }
        Array(arr) => {
            for val in arr {
                strip_format_keys(val);
            }
        }
        _ => {}
    }
}
