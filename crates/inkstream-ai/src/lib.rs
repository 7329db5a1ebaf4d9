//! Inkstream AI - token sources for the chat streaming pipeline
//!
//! This crate provides:
//! - The `TokenSource` capability: a conversation in, ordered text deltas out
//! - A live OpenAI-compatible upstream adapter
//! - A deterministic mock that replays a reference document

pub mod error;
pub mod source;

pub use error::{AiError, Result};
pub use source::{
    DeltaStream, MockTokenSource, OpenAiSettings, OpenAiTokenSource, REFERENCE_DOCUMENT,
    RetryPolicy, TokenSource, TokenSourceConfig, TokenSourceKind, build_token_source,
};
