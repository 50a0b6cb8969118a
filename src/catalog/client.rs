//! Catalog Client (A) — spec §4.1.
//!
//! Stateless by contract ("callers cache results per reconcile pass"); the resolver
//! builds a short-lived `HashMap<(catalog, pkg), Package>` cache around calls to
//! whichever `CatalogClient` impl is in scope, exactly as spec §4.1 describes.

use async_trait::async_trait;

use crate::catalog::model::Bundle;
use crate::error::{Error, Result};

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_packages(&self) -> Result<Vec<String>>;

    /// Resolves a (package, channel) to the channel's current bundle.
    async fn find_csv_for_package_under_channel(
        &self,
        pkg: &str,
        channel: &str,
    ) -> Result<Bundle>;

    /// Finds the bundle whose `replaces` names `current_csv` within `channel`, or
    /// `Ok(None)` if `current_csv` is already the channel head.
    async fn find_replacement(
        &self,
        pkg: &str,
        channel: &str,
        current_csv: &str,
    ) -> Result<Option<Bundle>>;

    /// Finds the bundle across all packages this client serves that owns the given
    /// GVK. `Error::AmbiguousOwner` if more than one package claims it.
    async fn find_crd_owner(&self, group: &str, version: &str, kind: &str) -> Result<Bundle>;

    /// Resolves a specific CSV name within a package/channel, used for
    /// `Subscription.spec.starting_csv`.
    async fn find_bundle_by_csv_name(
        &self,
        pkg: &str,
        channel: &str,
        csv_name: &str,
    ) -> Result<Bundle>;
}

/// Shared helper: turns "no bundle matched" into the typed `PackageNotFound`/
/// `ChannelNotFound` pair instead of a bare `None`, since every impl needs this.
pub(crate) fn not_found(pkg: &str, channel: Option<&str>) -> Error {
    match channel {
        Some(channel) => Error::ChannelNotFound {
            package: pkg.to_string(),
            channel: channel.to_string(),
        },
        None => Error::PackageNotFound(pkg.to_string()),
    }
}
