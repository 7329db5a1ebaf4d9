use thiserror::Error;

use crate::consumer::ConsumerState;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unexpected {event} event while {state}")]
    UnexpectedEvent {
        state: ConsumerState,
        event: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
