//! softgrep model server binary
//!
//! Loads configuration, builds the compute backend, and serves the model and
//! health services until SIGINT/SIGTERM, then drains and exits.

use anyhow::Context;
use clap::Parser;
use softgrep_server::{
    backend::build_backend,
    config::Config,
    interceptor::{LoggingInterceptor, MetricsInterceptor},
    lifecycle::Server,
    observability::{init_observability, MetricsCollector},
    rpc::PredictHandler,
    shutdown::listen_for_signals,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "softgrep-server", version, about = "Embedding model server for softgrep")]
struct Cli {
    /// Host to listen on (overrides config)
    #[arg(long, env = "SOFTGREP_HOST")]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long, short, env = "SOFTGREP_PORT")]
    port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(long, short, env = "CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate().context("invalid configuration")?;

    init_observability(&config.logging.level, &config.logging.format);
    info!("Starting softgrep model server v{}", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(MetricsCollector::new());

    let backend = build_backend(&config.backend).context("failed to build compute backend")?;
    info!("Compute backend '{}' initialized", backend.name());

    let handler = PredictHandler::new(backend, config.backend.timeout()).with_metrics(metrics.clone());

    let running = Server::new(handler)
        .with_interceptor(LoggingInterceptor::new())
        .with_interceptor(MetricsInterceptor::new(metrics.clone()))
        .with_health_keys(config.server.health_keys.clone())
        .with_metrics(metrics)
        .with_grace_margin(config.server.grace_margin())
        .with_max_body_size(config.server.max_body_size_mb * 1024 * 1024)
        .start(&config.server.listen_address())
        .await
        .with_context(|| format!("failed to start on {}", config.server.listen_address()))?;

    let signals = listen_for_signals(running.stop_handle(), config.server.drain_timeout())
        .context("failed to install signal handlers")?;
    info!("Listening on {}", running.local_addr());

    running.await_termination().await;
    let _ = signals.await;

    info!("Server shutdown complete");
    Ok(())
}
