#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use inkstream_ai::build_token_source;
use inkstream_server::{ServerConfig, ServerState, create_router, init_tracing};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Inkstream chat server");

    let config = ServerConfig::load()?;
    let token_source =
        build_token_source(&config.source).context("Failed to initialize token source")?;
    tracing::info!(
        source = token_source.name(),
        allow_any_origin = config.allow_any_origin,
        "Token source ready"
    );

    let state = Arc::new(ServerState::from_config(&config, token_source));
    let app = create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    tracing::info!("Inkstream running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to start server")?;

    tracing::info!("Inkstream server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
