//! Flotilla - minimal two-tier container orchestrator
//!
//! A manager accepts task submissions and places them onto worker nodes;
//! each worker drives its tasks through their lifecycle against the local
//! Docker daemon and reports observed state back.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "Minimal container orchestrator: manager and worker in one binary")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Enable debug logging
    #[arg(short, long, env = "FLOTILLA_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flotilla={}", log_level).into()),
        )
        .init();

    info!("Starting flotilla v{}", env!("CARGO_PKG_VERSION"));

    let config = flotilla::config::Configuration::from_env()?;

    let result = match cli.command {
        Some(cmd::Commands::Manager) => cmd::manager::run(config).await,
        Some(cmd::Commands::Worker) => cmd::worker::run(config).await,
        None => cmd::root::run(config).await,
    };

    if let Err(e) = result {
        error!("flotilla error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
