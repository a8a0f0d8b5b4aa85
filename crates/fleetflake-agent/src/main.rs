mod config;
mod telemetry;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use config::{AgentConfig, CliArgs};
use fleetflake::NodeIdFacade;
use telemetry::init_telemetry;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AgentConfig::try_from(args)?;

    init_telemetry(config.log_json)?;
    log_startup_info(&config);

    let service = NodeIdFacade::new(config.facade.clone())
        .start()
        .await
        .context("failed to allocate a node id")?;
    tracing::info!(
        node_id = %service.node_id(),
        offset = service.node_id().offset(),
        category = %service.category(),
        strategy = %service.strategy(),
        "node id ready"
    );

    let outcome = match config.count {
        Some(count) => print_ids(&service, count),
        None => shutdown_signal().await,
    };

    // Release even if printing or signal setup failed.
    service
        .shutdown()
        .await
        .context("failed to release the node id")?;
    tracing::info!("Agent shut down successfully");
    outcome
}

fn log_startup_info(config: &AgentConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting fleetflake agent with full config: {:#?}", config);
    } else {
        tracing::info!(
            category = %config.facade.category,
            strategy = %config.facade.strategy,
            endpoints = config.facade.store_endpoints.len(),
            "Starting fleetflake agent"
        );
    }
}

fn print_ids(service: &fleetflake::IdService, count: usize) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    for _ in 0..count {
        writeln!(out, "{}", service.generate())?;
    }
    out.flush()?;
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, releasing node id...");
    Ok(())
}
