//! Manager command - runs the cluster-level coordinator and its API

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flotilla::config::Configuration;
use flotilla::http;
use flotilla::manager::{api, client::HttpWorkerGateway, Manager};

/// Build a manager over the given worker fleet, spawn its background loops,
/// and return it with its router
pub fn start(
    workers: Vec<String>,
    reconcile_interval: Duration,
    token: &CancellationToken,
) -> Result<(Arc<Manager>, Router)> {
    if workers.is_empty() {
        bail!("no worker addresses configured; set FLOTILLA_WORKERS");
    }

    let gateway = Arc::new(HttpWorkerGateway::new()?);
    let manager = Arc::new(Manager::new(workers, gateway));

    manager.clone().spawn_dispatch_loop(token.clone());
    manager
        .clone()
        .spawn_reconcile_loop(reconcile_interval, token.clone());

    let router = api::build_router(api::AppState {
        manager: manager.clone(),
    });
    Ok((manager, router))
}

/// Run the manager role only
pub async fn run(config: Configuration) -> Result<()> {
    let token = CancellationToken::new();
    let handle = axum_server::Handle::new();
    super::spawn_shutdown_watcher(token.clone(), vec![handle.clone()]);

    let (manager, router) = start(
        config.manager.workers.clone(),
        config.intervals.reconcile,
        &token,
    )?;
    let addr = config.manager.bind_addr()?;
    info!(
        "Manager API listening on {} (placing onto {} workers)",
        addr,
        manager.workers().len()
    );

    http::serve(addr, router, handle).await
}
