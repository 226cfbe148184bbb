use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use parley_core::{Core, DirectoryScheduler, ParleyConfig, ParleyPaths};
use parley_mcp::McpHandler;

mod serve;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Query a team-messaging workspace through a cached directory.")]
#[command(version)]
struct Cli {
    /// Data directory holding parley.toml and the directory snapshots
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/parley.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen on a Unix socket instead of stdio
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. debug, parley_core=trace)
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match &cli.data_dir {
        Some(dir) => ParleyPaths::from_base(dir.clone()),
        None => ParleyPaths::from_env(),
    };
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_path.clone());
    let config = ParleyConfig::load_with_env(&config_path)?;

    // stdout carries tool responses; logs go to stderr
    let fallback = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();

    info!("Using config {}", config_path.display());
    let refresh_interval = config.cache.refresh_interval();
    let core = Core::init(&paths, config)
        .await
        .context("Failed to initialize parley")?;

    let cancel = CancellationToken::new();
    let warmup = core.cache.spawn_warmup(&cancel);
    let scheduler = DirectoryScheduler::new(core.cache.clone(), refresh_interval).spawn(cancel.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received, shutting down"),
                Err(err) => error!("Failed to listen for ctrl-c: {}", err),
            }
            cancel.cancel();
        });
    }

    let handler = Arc::new(McpHandler::new(core.engine.clone(), cancel.clone()));
    let served = match &cli.socket {
        Some(path) => serve::serve_socket(path, handler, cancel.clone()).await,
        None => serve::serve_stdio(handler, cancel.clone()).await,
    };

    cancel.cancel();
    for task in warmup {
        let _ = task.await;
    }
    if let Some(task) = scheduler {
        let _ = task.await;
    }
    info!("Stopped");
    served
}
