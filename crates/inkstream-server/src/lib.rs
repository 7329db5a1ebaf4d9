//! Inkstream Server - HTTP entrypoint of the chat streaming pipeline

pub mod api;
pub mod config;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use api::{AppState, ServerState};
pub use config::ServerConfig;

/// Build the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/api/chat", get(api::chat::stream_chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the global tracing subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inkstream_server=debug,tower_http=info".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}
