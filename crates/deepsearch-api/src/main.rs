use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use deepsearch_api::{AppState, build_router};
use deepsearch_core::{
    ConfigLoader, ResearchEngine, TelemetryOptions, build_model, init_metrics_from_env,
    init_telemetry,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deepsearch-api", version, about = "Serve DeepSearch pipelines over HTTP")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path to a TOML config file (defaults to $DEEPSEARCH_CONFIG or ./config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pipeline runs allowed at once; further runs get 429.
    #[arg(long, default_value_t = 5)]
    max_concurrent_runs: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(TelemetryOptions {
        with_target: false,
        ..TelemetryOptions::default()
    })?;
    init_metrics_from_env("deepsearch-api");

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;

    let config = ConfigLoader::load(args.config)?;
    let model = build_model(&config.models)?;
    let engine = ResearchEngine::new(config, model)?;
    let app = build_router(AppState::new(engine, args.max_concurrent_runs));

    info!("DeepSearch API listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
