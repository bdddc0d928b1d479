//! reglens-daemon - HTTP server for the regulatory analysis pipeline.
//!
//! Exposes three endpoints over the orchestrator:
//!
//! - `POST /analyze`: run the full pipeline over a regulatory text
//! - `GET /health`: component health
//! - `GET /audit/{execution_id}`: stored audit record
//!
//! Process-wide services (embedding model, vector index, audit store,
//! model provider) are constructed once at startup and shared across
//! requests; each request drives one sequential pipeline run.

mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reglens_core::{Orchestrator, RuntimeConfig};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// reglens daemon - regulatory analysis over HTTP
#[derive(Parser, Debug)]
#[command(name = "reglens-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP listener to
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!("failed to register SIGTERM handler: {err}");
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("ctrl-c handler failed: {err}");
                }
                info!("received interrupt");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler failed: {err}");
        }
        info!("received interrupt");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let config = RuntimeConfig::from_env().context("failed to load configuration")?;
    info!(
        database = %config.database_path,
        repo = %config.repo_path.display(),
        embedding_model = %config.embedding_model,
        "configuration loaded"
    );

    let orchestrator =
        Arc::new(Orchestrator::new(config).context("failed to initialize services")?);
    let app = http::build_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "reglens-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    info!("daemon shutdown complete");
    Ok(())
}
