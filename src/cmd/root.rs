//! Default command - runs a combined node with both the worker and
//! manager APIs in one process

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flotilla::config::Configuration;
use flotilla::http;

/// Run the combined node
pub async fn run(config: Configuration) -> Result<()> {
    let token = CancellationToken::new();
    let worker_handle = axum_server::Handle::new();
    let manager_handle = axum_server::Handle::new();
    super::spawn_shutdown_watcher(
        token.clone(),
        vec![worker_handle.clone(), manager_handle.clone()],
    );

    let (worker, worker_router) = super::worker::start(&config, &token)?;

    // With no fleet configured, the manager places onto the local worker
    let workers = if config.manager.workers.is_empty() {
        vec![config.worker.local_addr()]
    } else {
        config.manager.workers.clone()
    };
    let (_manager, manager_router) =
        super::manager::start(workers, config.intervals.reconcile, &token)?;

    let worker_addr = config.worker.bind_addr()?;
    let manager_addr = config.manager.bind_addr()?;
    info!(
        "Combined node {}: worker API on {}, manager API on {}",
        worker.name(),
        worker_addr,
        manager_addr
    );

    tokio::try_join!(
        http::serve(worker_addr, worker_router, worker_handle),
        http::serve(manager_addr, manager_router, manager_handle),
    )?;

    Ok(())
}
