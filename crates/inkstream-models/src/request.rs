//! Chat turn request and its query-string form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{ConversationHistory, Message};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Message is required")]
    MissingMessage,

    #[error("Invalid images parameter: {0}")]
    InvalidImages(#[source] serde_json::Error),

    #[error("Invalid history parameter: {0}")]
    InvalidHistory(#[source] serde_json::Error),
}

/// Raw query parameters of `GET /api/chat`.
///
/// `images` and `history` carry JSON-encoded arrays; absent or empty means none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

/// One conversational turn as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    pub images: Vec<String>,
    pub history: ConversationHistory,
}

fn is_blank(message: &str) -> bool {
    message.trim().is_empty()
}

impl ChatRequest {
    /// Create a request, rejecting a message that is empty after trimming.
    pub fn new(message: impl Into<String>) -> Result<Self, RequestError> {
        let message = message.into();
        if is_blank(&message) {
            return Err(RequestError::MissingMessage);
        }
        Ok(Self {
            message,
            images: Vec::new(),
            history: Vec::new(),
        })
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }

    /// Encode into query parameters. Empty lists are omitted.
    pub fn to_query(&self) -> Result<ChatQuery, serde_json::Error> {
        let images = if self.images.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.images)?)
        };
        let history = if self.history.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.history)?)
        };

        Ok(ChatQuery {
            message: Some(self.message.clone()),
            images,
            history,
        })
    }

    /// Decode query parameters. Validation happens before JSON parsing.
    pub fn from_query(query: ChatQuery) -> Result<Self, RequestError> {
        let message = query
            .message
            .filter(|message| !is_blank(message))
            .ok_or(RequestError::MissingMessage)?;

        let images = match query.images.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(RequestError::InvalidImages)?,
        };
        let history = match query.history.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str(raw).map_err(RequestError::InvalidHistory)?,
        };

        Ok(Self {
            message,
            images,
            history,
        })
    }

    /// The new user turn: text first, then one image part per reference.
    pub fn user_message(&self) -> Message {
        Message::user_with_images(self.message.clone(), self.images.iter().cloned())
    }

    /// Outbound conversation: `history ++ [user message]`.
    pub fn conversation(&self) -> ConversationHistory {
        let mut conversation = Vec::with_capacity(self.history.len() + 1);
        conversation.extend(self.history.iter().cloned());
        conversation.push(self.user_message());
        conversation
    }
}
