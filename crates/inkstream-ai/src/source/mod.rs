//! Token sources: producers of text deltas for a conversation.
//!
//! The dispatcher only sees [`TokenSource`]; the live upstream adapter and the
//! deterministic mock are interchangeable behind it.

mod mock;
mod openai;
mod retry;

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use inkstream_models::Message;
use serde::Deserialize;

use crate::error::{AiError, Result};

pub use mock::{DEFAULT_MOCK_DELAY, MockTokenSource, REFERENCE_DOCUMENT};
pub use openai::{
    DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MAX_TOKENS, DEFAULT_OPENAI_MODEL, OpenAiContent,
    OpenAiMessage, OpenAiPart, OpenAiTokenSource, to_openai_messages,
};
pub use retry::RetryPolicy;

/// Ordered text deltas. An `Err` item ends the stream.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Producer of incremental text for a conversation.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Start producing deltas for `conversation`.
    ///
    /// An error here means nothing was streamed yet. Concatenating the yielded
    /// deltas in order gives the full reply; no separators are added by callers.
    async fn open(&self, conversation: Vec<Message>) -> Result<DeltaStream>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TokenSourceKind {
    #[default]
    #[serde(rename = "mock")]
    Mock,
    #[serde(rename = "openai")]
    OpenAi,
}

impl TokenSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::OpenAi => "openai",
        }
    }
}

impl fmt::Display for TokenSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenSourceKind {
    type Err = AiError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai" => Ok(Self::OpenAi),
            other => Err(AiError::Llm(format!("Unknown token source: {other}"))),
        }
    }
}

/// Upstream settings for [`OpenAiTokenSource`].
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_tokens: DEFAULT_OPENAI_MAX_TOKENS,
        }
    }
}

/// Which token source to build, and how.
#[derive(Debug, Clone)]
pub struct TokenSourceConfig {
    pub kind: TokenSourceKind,
    pub mock_delay: Duration,
    pub openai: OpenAiSettings,
}

impl Default for TokenSourceConfig {
    fn default() -> Self {
        Self {
            kind: TokenSourceKind::Mock,
            mock_delay: DEFAULT_MOCK_DELAY,
            openai: OpenAiSettings::default(),
        }
    }
}

/// Build the configured token source. The live variant requires an API key.
pub fn build_token_source(config: &TokenSourceConfig) -> Result<Arc<dyn TokenSource>> {
    match config.kind {
        TokenSourceKind::Mock => Ok(Arc::new(
            MockTokenSource::new().with_delay(config.mock_delay),
        )),
        TokenSourceKind::OpenAi => {
            let api_key = config
                .openai
                .api_key
                .as_deref()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| AiError::MissingApiKey("openai".to_string()))?;

            Ok(Arc::new(
                OpenAiTokenSource::new(api_key)
                    .with_model(config.openai.model.clone())
                    .with_base_url(config.openai.base_url.clone())
                    .with_max_tokens(config.openai.max_tokens),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<TokenSourceKind>().unwrap(), TokenSourceKind::OpenAi);
        assert_eq!(" mock ".parse::<TokenSourceKind>().unwrap(), TokenSourceKind::Mock);
        assert!("anthropic".parse::<TokenSourceKind>().is_err());
    }

    #[test]
    fn build_defaults_to_mock() {
        let source = build_token_source(&TokenSourceConfig::default()).unwrap();
        assert_eq!(source.name(), "mock");
    }

    #[test]
    fn build_openai_requires_api_key() {
        let mut config = TokenSourceConfig {
            kind: TokenSourceKind::OpenAi,
            ..TokenSourceConfig::default()
        };
        assert!(matches!(
            build_token_source(&config),
            Err(AiError::MissingApiKey(_))
        ));

        config.openai.api_key = Some("sk-test".to_string());
        let source = build_token_source(&config).unwrap();
        assert_eq!(source.name(), "openai");
    }
}
