//! Worker command - runs the node-level agent and its API

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flotilla::config::Configuration;
use flotilla::http;
use flotilla::runtime::DockerRuntime;
use flotilla::stats::SysinfoSource;
use flotilla::worker::{api, Worker};

/// Build a worker wired to the local Docker daemon, spawn its background
/// loops, and return it with its router
pub fn start(config: &Configuration, token: &CancellationToken) -> Result<(Arc<Worker>, Router)> {
    let runtime = Arc::new(DockerRuntime::new()?);
    let stats_source = Arc::new(SysinfoSource::new());

    let name = sysinfo::System::host_name().unwrap_or_else(|| "worker".to_string());
    let worker = Arc::new(Worker::new(name, runtime, stats_source));

    worker.clone().spawn_drain_loop(config.intervals.drain, token.clone());
    worker.clone().spawn_stats_loop(config.intervals.stats, token.clone());

    let router = api::build_router(api::AppState {
        worker: worker.clone(),
    });
    Ok((worker, router))
}

/// Run the worker role only
pub async fn run(config: Configuration) -> Result<()> {
    let token = CancellationToken::new();
    let handle = axum_server::Handle::new();
    super::spawn_shutdown_watcher(token.clone(), vec![handle.clone()]);

    let (worker, router) = start(&config, &token)?;
    let addr = config.worker.bind_addr()?;
    info!("Worker {} API listening on {}", worker.name(), addr);

    http::serve(addr, router, handle).await
}
