//! Error taxonomy for the resolver / executor / catalog-client boundary.
//!
//! `main.rs` and ad-hoc glue still use `anyhow::Result`; this typed enum exists
//! at the component boundaries where a caller needs to distinguish transient
//! from user-fix-required from fatal.

use thiserror::Error;

/// Result typedef used across the resolver/executor/catalog modules.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Generic cluster API error. Most of these are transient (conflict, not-found
    /// during read-back) and the caller decides whether to retry.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid semver: {0}")]
    Semver(#[from] semver::Error),

    /// §4.1 — requested package does not exist in any catalog visible to the subscription.
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// §4.1 — requested channel does not exist within an otherwise-known package.
    #[error("channel {channel} not found in package {package}")]
    ChannelNotFound { package: String, channel: String },

    /// §4.1 — two packages in scope both claim ownership of the same GVK.
    #[error("ambiguous CRD owner for {0}: more than one package owns this GVK")]
    AmbiguousOwner(String),

    /// §4.3 — resolution is unsatisfiable: conflicting owners, unresolvable CSV name,
    /// or a cycle in the `replaces` graph.
    #[error("dependency conflict: {0}")]
    DependencyConflict(String),

    /// §4.3/§7 — catalog RPC/ConfigMap read failed in a way that is expected to
    /// clear on its own (catalog pod restarting, ConfigMap not yet synced).
    #[error("catalog source unavailable: {0}")]
    CatalogUnavailable(String),

    /// §4.5 — CRD update would drop a version the API server has already stored.
    #[error("CRD upgrade for {crd} would cause risk of data loss: stored version {version} is not present in the new CRD")]
    CrdUpgradeWouldCauseDataLoss { crd: String, version: String },

    /// §4.5 — a CSV attempted to claim an APIService already owned by a different,
    /// non-replaced CSV.
    #[error("owner conflict on {resource}: already owned by {existing_owner}")]
    OwnerConflict {
        resource: String,
        existing_owner: String,
    },

    /// §4.6 — an installed CSV's OperatorGroup no longer supports one of the CSV's
    /// declared install modes.
    #[error("unsupported operator group for install modes {0:?}")]
    UnsupportedOperatorGroup(Vec<String>),

    /// §4.5 — bundle unpack exceeded the configured deadline.
    #[error("bundle unpack timed out after {0:?}")]
    BundleUnpackTimeout(std::time::Duration),

    /// §4.5 — a step's overall executor deadline (60s, test-visible) elapsed.
    #[error("step execution deadline exceeded for {0}")]
    StepDeadlineExceeded(String),

    /// Catch-all for anything that doesn't warrant its own variant yet.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// §7 taxonomy: transient errors are always safe to retry with backoff and
    /// never need to be surfaced as a terminal condition.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(e) => is_transient_kube_error(e),
            Error::CatalogUnavailable(_) => true,
            _ => false,
        }
    }
}

fn is_transient_kube_error(e: &kube::Error) -> bool {
    match e {
        kube::Error::Api(resp) => resp.code == 409 || resp.code == 404 || resp.code == 429,
        _ => false,
    }
}
