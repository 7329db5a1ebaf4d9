//! Chat turns and their content parts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chat message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Image reference carried inside a content part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a structured message body. Order is presentation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("structured message content must contain at least one part")]
pub struct EmptyContentError;

/// Message body: plain text or a non-empty list of parts.
///
/// A plain string is equivalent to a single text part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawContent", into = "RawContent")]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl TryFrom<RawContent> for MessageContent {
    type Error = EmptyContentError;

    fn try_from(raw: RawContent) -> Result<Self, Self::Error> {
        match raw {
            RawContent::Text(text) => Ok(Self::Text(text)),
            RawContent::Parts(parts) => Self::parts(parts),
        }
    }
}

impl From<MessageContent> for RawContent {
    fn from(content: MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => Self::Text(text),
            MessageContent::Parts(parts) => Self::Parts(parts),
        }
    }
}

impl MessageContent {
    /// Build structured content, rejecting an empty part list.
    pub fn parts(parts: Vec<ContentPart>) -> Result<Self, EmptyContentError> {
        if parts.is_empty() {
            return Err(EmptyContentError);
        }
        Ok(Self::Parts(parts))
    }

    /// Concatenated text of all text parts, in order.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }

    /// Append text. Structured content extends its trailing text part, or
    /// gains a new one when it ends with an image.
    pub fn push_text(&mut self, text: &str) {
        match self {
            Self::Text(existing) => existing.push_str(text),
            Self::Parts(parts) => match parts.last_mut() {
                Some(ContentPart::Text { text: existing }) => existing.push_str(text),
                _ => parts.push(ContentPart::text(text)),
            },
        }
    }

    /// Image URLs referenced by this content, in order.
    pub fn image_urls(&self) -> Vec<&str> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }

    /// View as a part list; plain text becomes one text part.
    pub fn to_parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::text(text.clone())],
            Self::Parts(parts) => parts.clone(),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Chronological sequence of turns, oldest first.
pub type ConversationHistory = Vec<Message>;

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self { role, content }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Create a user message whose text is followed by one image part per URL.
    ///
    /// Without images this is identical to [`Message::user`].
    pub fn user_with_images<I, S>(text: impl Into<String>, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let images: Vec<String> = images.into_iter().map(Into::into).collect();
        if images.is_empty() {
            return Self::user(text);
        }

        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::text(text));
        parts.extend(images.into_iter().map(ContentPart::image));
        Self::new(Role::User, MessageContent::Parts(parts))
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}
