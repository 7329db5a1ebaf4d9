//! Deterministic token source for development and reproducible tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inkstream_models::Message;
use tokio::time::sleep;

use super::{DeltaStream, TokenSource};
use crate::error::{AiError, Result};

/// Markdown document replayed by [`MockTokenSource`].
pub const REFERENCE_DOCUMENT: &str = include_str!("reference_document.md");

pub const DEFAULT_MOCK_DELAY: Duration = Duration::from_millis(50);

/// Replays a fixed document one space-delimited word at a time.
///
/// Every word except the last keeps its trailing space, so concatenating the
/// deltas reproduces the document byte for byte. Never fails.
#[derive(Debug, Clone)]
pub struct MockTokenSource {
    document: Arc<str>,
    delay: Duration,
}

impl Default for MockTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenSource {
    pub fn new() -> Self {
        Self {
            document: Arc::from(REFERENCE_DOCUMENT),
            delay: DEFAULT_MOCK_DELAY,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Arc::from(document.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Split into deltas, re-attaching the separating space to each word.
    pub fn tokenize(document: &str) -> Vec<String> {
        let words: Vec<&str> = document.split(' ').collect();
        let last = words.len() - 1;
        words
            .into_iter()
            .enumerate()
            .map(|(index, word)| {
                if index < last {
                    format!("{word} ")
                } else {
                    word.to_string()
                }
            })
            .collect()
    }
}

#[async_trait]
impl TokenSource for MockTokenSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, conversation: Vec<Message>) -> Result<DeltaStream> {
        tracing::debug!(turns = conversation.len(), "Opening mock token source");

        let tokens = Self::tokenize(&self.document);
        let delay = self.delay;

        Ok(Box::pin(async_stream::stream! {
            for (index, token) in tokens.into_iter().enumerate() {
                if index > 0 && !delay.is_zero() {
                    sleep(delay).await;
                }
                yield Ok::<_, AiError>(token);
            }
        }))
    }
}
