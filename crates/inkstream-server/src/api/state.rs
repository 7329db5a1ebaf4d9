use inkstream_ai::TokenSource;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;

/// Process-wide state shared by all handlers. Nothing here is mutated per request.
pub struct ServerState {
    pub token_source: Arc<dyn TokenSource>,
    pub allow_any_origin: bool,
    pub keep_alive: Option<Duration>,
}

impl ServerState {
    pub fn new(token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_source,
            allow_any_origin: true,
            keep_alive: None,
        }
    }

    pub fn from_config(config: &ServerConfig, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_source,
            allow_any_origin: config.allow_any_origin,
            keep_alive: config.keep_alive,
        }
    }
}

/// Application state shared across all API handlers
pub type AppState = Arc<ServerState>;
