use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inkstream_ai::AiError;
use inkstream_models::RequestError;
use serde::Serialize;
use thiserror::Error;

/// JSON envelope for failed requests: `{"success": false, "error": ".."}`.
#[derive(Serialize, Debug)]
pub struct ApiResponse {
    pub success: bool,
    pub error: String,
}

impl ApiResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Failures reported before the event stream opens.
///
/// Once stream headers are sent, failures travel as SSE error frames instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] RequestError),

    #[error(transparent)]
    InvalidQuery(#[from] QueryRejection),

    #[error(transparent)]
    Initialization(#[from] AiError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::Initialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}
