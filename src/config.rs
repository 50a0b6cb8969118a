//! Process configuration, read once at startup from the environment.
//!
//! There is no mounted config file in this system's data model; an in-cluster
//! operator's configuration surface is environment variables set by its own
//! Deployment spec, so `Config::from_env` reads from there directly.

use std::time::Duration;

use anyhow::Context;

/// Env var holding the namespace this process watches. Unset or empty means
/// cluster-wide (`Api::all`).
const WATCH_NAMESPACE_ENV: &str = "OLM_WATCH_NAMESPACE";

/// Default bundle-unpack deadline per spec §5 (overridable per-OperatorGroup via
/// the `operatorframework.io/bundle-unpack-timeout` annotation).
const DEFAULT_BUNDLE_UNPACK_TIMEOUT: Duration = Duration::from_secs(600);

/// Test-profile default named explicitly in spec §5.
const TEST_BUNDLE_UNPACK_TIMEOUT: Duration = Duration::from_secs(5);

/// InstallPlan step retry deadline, spec §4.5/§5 — test-visible, not configurable
/// per-plan, but kept on `Config` so tests can shrink it.
const DEFAULT_STEP_RETRY_DEADLINE: Duration = Duration::from_secs(60);

/// Catalog-source poll interval floor, spec §5.
const MIN_CATALOG_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Config {
    /// Empty string means cluster-wide.
    pub watch_namespace: String,
    pub default_bundle_unpack_timeout: Duration,
    pub step_retry_deadline: Duration,
    pub min_catalog_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let watch_namespace = std::env::var(WATCH_NAMESPACE_ENV).unwrap_or_default();

        let default_bundle_unpack_timeout = match std::env::var("OLM_TEST_MODE") {
            Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") => TEST_BUNDLE_UNPACK_TIMEOUT,
            _ => DEFAULT_BUNDLE_UNPACK_TIMEOUT,
        };

        let step_retry_deadline = parse_secs_env("OLM_STEP_RETRY_DEADLINE_SECS")
            .context("OLM_STEP_RETRY_DEADLINE_SECS must be an integer number of seconds")?
            .unwrap_or(DEFAULT_STEP_RETRY_DEADLINE);

        let min_catalog_poll_interval = parse_secs_env("OLM_MIN_CATALOG_POLL_INTERVAL_SECS")
            .context("OLM_MIN_CATALOG_POLL_INTERVAL_SECS must be an integer number of seconds")?
            .unwrap_or(MIN_CATALOG_POLL_INTERVAL);

        Ok(Config {
            watch_namespace,
            default_bundle_unpack_timeout,
            step_retry_deadline,
            min_catalog_poll_interval,
        })
    }
}

fn parse_secs_env(key: &str) -> anyhow::Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(v) => {
            let secs: u64 = v.parse().with_context(|| format!("parsing {key}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // SAFETY-equivalent: tests run single-threaded per module in this crate's
        // CI config; this test only reads the env it doesn't set.
        let cfg = Config {
            watch_namespace: String::new(),
            default_bundle_unpack_timeout: DEFAULT_BUNDLE_UNPACK_TIMEOUT,
            step_retry_deadline: DEFAULT_STEP_RETRY_DEADLINE,
            min_catalog_poll_interval: MIN_CATALOG_POLL_INTERVAL,
        };
        assert_eq!(cfg.step_retry_deadline, Duration::from_secs(60));
        assert_eq!(cfg.min_catalog_poll_interval, Duration::from_secs(15));
    }
}
