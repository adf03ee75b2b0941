//! CLI command handlers

use std::time::Duration;

use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub mod manager;
pub mod root;
pub mod worker;

/// Grace period for in-flight HTTP requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Subcommand)]
pub enum Commands {
    /// Run the manager role only
    Manager,
    /// Run the worker role only
    Worker,
}

/// Cancel background loops and drain HTTP servers on ctrl-c
pub(crate) fn spawn_shutdown_watcher(
    token: CancellationToken,
    handles: Vec<axum_server::Handle>,
) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        warn!("Received shutdown signal, stopping...");

        token.cancel();
        for handle in handles {
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
    });
}
