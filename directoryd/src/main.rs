mod aggregate;
mod api;
mod config;
mod directory;
mod error;
mod exchange;
mod locality;
mod probe;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::aggregate::template::TemplateContext;
use crate::config::Config;
use crate::directory::Directory;
use crate::probe::Prober;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("directoryd=info"))
        )
        .init();

    tracing::info!("Starting directoryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/service-directory/directoryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);
    tracing::info!("Serving directory from {}", config.directory.path.display());

    // Probe client never follows redirects; the upstream client does
    let prober = Prober::new(&config.probe.user_agent)
        .context("Failed to build probe client")?;
    let upstream = reqwest::Client::builder()
        .user_agent(config.probe.user_agent.as_str())
        .build()
        .context("Failed to build upstream client")?;

    let context = TemplateContext::from_env();
    if !context.credentials().is_complete() {
        tracing::warn!("Directory exchange credentials are incomplete, exchange-backed groups will be empty");
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Build API router
    let app_state = api::routes::AppState {
        directory: Directory::from_config(&config, prober, upstream),
        document_path: Arc::new(config.directory.path.clone()),
        context: Arc::new(context),
        cancel: cancel.clone(),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Abort in-flight probes and upstream fetches
    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
