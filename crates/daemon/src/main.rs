//! Analyst daemon - pipeline module execution over a local socket
//!
//! Reads its settings once, builds the processor registry and serves
//! execute/generate/teardown requests until the connection closes.

use anyhow::{Context as _, Result};
use asset_pipeline_daemon::{builtin_registry, CliArgs, DaemonConfig, Server, REGISTRY_VERSION};
use asset_pipeline_core::Dispatcher;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = DaemonConfig::load(&args).context("Failed to load configuration")?;

    let log_level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // One request at a time; blocking work goes to the blocking pool
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: DaemonConfig) -> Result<()> {
    let ctx = config
        .build_context()
        .await
        .context("Failed to build execution context")?;

    let registry = builtin_registry(config.image.as_deref());
    info!(
        "Registered {} processing units (registry v{})",
        registry.class_names().len(),
        REGISTRY_VERSION
    );

    let dispatcher = Dispatcher::new(Arc::new(registry), ctx);
    let server = Server::bind(&config.listen, dispatcher, config.keep_listening)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;

    server.run().await.context("Daemon stopped on a protocol fault")?;
    info!("Connection closed, shutting down");
    Ok(())
}
