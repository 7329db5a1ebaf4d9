//! Wire unit of the chat event stream.
//!
//! Each event travels as one SSE frame, `data: <payload>\n\n`:
//! - `{"content": "..."}` for a delta
//! - `[DONE]` (not JSON-wrapped) for the end-of-stream sentinel
//! - `{"error": "..."}` for a terminal failure

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal payload of the normal end-of-stream frame.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta { content: String },
    Done,
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame carries neither content nor error")]
    Unrecognized,
}

#[derive(Serialize, Deserialize)]
struct DeltaPayload<'a> {
    content: &'a str,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

#[derive(Deserialize)]
struct IncomingPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamEvent {
    pub fn delta(content: impl Into<String>) -> Self {
        Self::Delta {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `Done` and `Error` end a stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta { .. })
    }

    /// Payload to place after `data: `.
    pub fn to_data(&self) -> String {
        // Serializing a struct of one string field cannot fail.
        match self {
            Self::Delta { content } => serde_json::to_string(&DeltaPayload { content })
                .unwrap_or_else(|_| String::from("{\"content\":\"\"}")),
            Self::Done => DONE_SENTINEL.to_string(),
            Self::Error { message } => serde_json::to_string(&ErrorPayload { error: message })
                .unwrap_or_else(|_| String::from("{\"error\":\"unknown error\"}")),
        }
    }

    /// Full frame including the `data: ` prefix and the blank-line terminator.
    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.to_data())
    }

    /// Decode a frame payload. An `error` key wins over `content`.
    pub fn parse(data: &str) -> Result<Self, FrameError> {
        if data.trim() == DONE_SENTINEL {
            return Ok(Self::Done);
        }

        let payload: IncomingPayload = serde_json::from_str(data)?;
        if let Some(message) = payload.error {
            return Ok(Self::Error { message });
        }
        match payload.content {
            Some(content) => Ok(Self::Delta { content }),
            None => Err(FrameError::Unrecognized),
        }
    }
}
