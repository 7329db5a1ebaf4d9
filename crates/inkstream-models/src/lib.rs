//! Inkstream Models - shared data contract of the chat streaming pipeline
//!
//! This crate provides:
//! - Chat messages and multimodal content parts
//! - The `StreamEvent` wire codec (`data:` frames, `[DONE]` sentinel)
//! - `ChatRequest` and its query-string encoding
//! - An incremental `text/event-stream` decoder

pub mod event;
pub mod message;
pub mod request;
pub mod sse;

pub use event::{DONE_SENTINEL, FrameError, StreamEvent};
pub use message::{
    ContentPart, ConversationHistory, EmptyContentError, ImageUrl, Message, MessageContent, Role,
};
pub use request::{ChatQuery, ChatRequest, RequestError};
pub use sse::SseDecoder;
