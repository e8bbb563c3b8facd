//! Coffee Defect Inference Server
//!
//! Loads one checkpoint at startup and serves `/health` and `/predict`
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use coffee_defect::backend::{backend_name, default_device, InferenceBackend};
use coffee_defect::Predictor;
use coffee_defect_server::{build_router, AppState, ServerConfig};

/// Coffee Defect Inference Server
#[derive(Parser, Debug)]
#[command(name = "coffee-defect-server")]
#[command(version)]
#[command(about = "HTTP inference API for the coffee bean defect classifier")]
struct Cli {
    /// Host to bind to
    #[arg(long, env = "COFFEE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "COFFEE_PORT", default_value = "5000")]
    port: u16,

    /// Checkpoint (.mpk) written by training
    #[arg(short, long, env = "COFFEE_MODEL_PATH")]
    model: PathBuf,

    /// Requests processed at once
    #[arg(long, env = "COFFEE_MAX_CONCURRENCY", default_value = "4")]
    max_concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "COFFEE_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    /// Largest accepted request body
    #[arg(long, env = "COFFEE_MAX_BODY_BYTES", default_value = "10485760")]
    max_body_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        model_path: cli.model,
        max_concurrency: cli.max_concurrency,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        max_body_bytes: cli.max_body_bytes,
    };

    info!("Coffee Defect Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model:           {:?}", config.model_path);
    info!("  Backend:         {}", backend_name());
    info!("  Max concurrency: {}", config.max_concurrency);
    info!("  Timeout:         {:?}", config.request_timeout);
    info!("  Max body:        {} bytes", config.max_body_bytes);

    let predictor = Predictor::<InferenceBackend>::load(&config.model_path, default_device())
        .with_context(|| format!("Failed to load model from {:?}", config.model_path))?;

    let addr = config.socket_addr()?;
    let state = Arc::new(AppState::new(predictor, config));
    let app = build_router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
}
