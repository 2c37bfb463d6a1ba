/// Inference service binary
///
/// Configured through `INFERENCE_*` environment variables.

use anyhow::{Context, Result};
use inference_server::{serve, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("inference_server=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!("Starting wake-word inference service");

    let config = ServerConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Wake words: {:?}, language: {}, sensitivity: {}",
        config.wake_words, config.language, config.sensitivity
    );

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    serve(listener, Arc::new(config), shutdown_signal()).await?;

    info!("Inference service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down inference service");
}
