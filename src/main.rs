mod cache;
mod catalog;
mod catalogsource;
mod config;
mod crd;
mod csv;
mod error;
mod installplan;
mod labels;
mod resolver;
mod resources;
mod subscription;
mod types;

use std::time::Duration;

use kube::Client;
use tracing::{error, info};

use crate::config::Config;
use crate::crd::print_crds_without_formats;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    if std::env::var("PRINT_CRD").is_ok() {
        print_crds_without_formats()?;
        return Ok(());
    }

    run().await
}

/// Spawns one reconciliation loop per controller (spec §9 "one `Controller`
/// future per reconciliation loop, run concurrently") plus the orphaned-APIService
/// sweep as a standalone periodic task (spec §4.5).
async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let client = Client::try_default().await?;
    let namespace = config.watch_namespace.clone();

    let subscription_loop = subscription::run(client.clone(), &namespace);
    let installplan_loop = installplan::run(client.clone(), &namespace, config.step_retry_deadline);
    let csv_loop = csv::run(client.clone(), &namespace, &config);
    let catalogsource_loop = catalogsource::run(client.clone(), &namespace, &config);
    let sweep_loop = run_orphan_sweep(client.clone());

    tokio::try_join!(
        subscription_loop,
        installplan_loop,
        csv_loop,
        catalogsource_loop,
        sweep_loop,
    )?;

    Ok(())
}

/// Periodic standalone sweep for APIServices whose owner CSV no longer exists
/// (spec §4.5 "a separate sweep", distinct from any single InstallPlan's steps).
async fn run_orphan_sweep(client: Client) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    loop {
        interval.tick().await;
        match installplan::executor::sweep_orphaned_api_services(client.clone()).await {
            Ok(deleted) if deleted > 0 => info!(deleted, "orphaned APIService sweep removed stale objects"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "orphaned APIService sweep failed"),
        }
    }
}
