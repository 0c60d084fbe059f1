use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulse::api;
use pulse::config::Config;
use pulse::context::AppContext;
use pulse::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(environment = ?config.environment, "Loaded configuration");

    // Initialize storage
    info!(
        backend = ?config.database.backend,
        url = %config.database.url,
        "Connecting to database"
    );
    let storage = storage::connect(&config.database).await?;
    storage.init().await?;
    info!("Database initialized successfully");

    let ctx = AppContext::new(config, storage);
    ctx.start_background_tasks();

    let router = api::create_api_router(ctx.clone());

    let addr = format!(
        "{}:{}",
        ctx.config.api_server.host, ctx.config.api_server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Pulse listening on http://{}", addr);
    info!("   - Websocket endpoint at ws://{}/ws", addr);
    info!("   - API endpoints available at http://{}/api/...", addr);

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(ctx.clone()))
    .await;

    if let Err(e) = served {
        error!(error = %e, "Server exited with error");
        return Err(e.into());
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C after closing every websocket, so the server drain
/// does not wait on upgraded connections
async fn shutdown_signal(ctx: Arc<AppContext>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    ctx.shutdown().await;
}
