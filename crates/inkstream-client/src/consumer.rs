//! Stream consumer state machine.
//!
//! ```text
//! Idle --submit--> Connecting --open/message--> Streaming --[DONE]--> Done
//!                      |                            |
//!                      +--timeout/error--> Errored <+--error frame/transport error
//! ```
//!
//! A new `submit` from any state closes the active source first, so at most one
//! connection is live per consumer.

use inkstream_models::{ChatRequest, ConversationHistory, Message, StreamEvent};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::encoder::encode_request;
use crate::error::{ClientError, Result};
use crate::transport::{EventSource, Transport, TransportEvent};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const TIMEOUT_MESSAGE: &str =
    "Sorry, I'm having trouble connecting to the server. Please try again.";
pub const CONNECT_FAILED_MESSAGE: &str =
    "Unable to connect to the server. Please check that the backend is running.";
pub const CONNECTION_LOST_MESSAGE: &str = "Connection was lost. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Done,
    Errored,
}

impl ConsumerState {
    /// A connection is requested or live.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

pub struct StreamConsumer<T: Transport> {
    transport: T,
    base_url: Url,
    timeout: Duration,
    state: ConsumerState,
    history: ConversationHistory,
    /// The last history entry is an assistant turn still receiving deltas.
    in_progress: bool,
    source: Option<T::Source>,
    deadline: Option<Instant>,
}

impl<T: Transport> StreamConsumer<T> {
    pub fn new(transport: T, base_url: Url) -> Self {
        Self {
            transport,
            base_url,
            timeout: DEFAULT_TIMEOUT,
            state: ConsumerState::Idle,
            history: Vec::new(),
            in_progress: false,
            source: None,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Seed the conversation, e.g. with a greeting.
    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Deadline of the connect timeout, armed only while connecting.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Start a new turn.
    ///
    /// Empty input is rejected before anything else happens. Otherwise any
    /// active source is closed, the user turn joins the history and a new
    /// source is opened in `Connecting`.
    pub fn submit(&mut self, message: &str, images: Vec<String>) -> Result<()> {
        let request = ChatRequest::new(message)
            .map_err(|_| ClientError::EmptyMessage)?
            .with_images(images)
            .with_history(self.history.clone());
        let url = encode_request(&self.base_url, &request)?;

        if self.state.is_active() {
            info!(state = %self.state, "Cancelling active stream for new request");
        }
        self.close_source();

        self.history.push(request.user_message());
        self.in_progress = false;
        self.source = Some(self.transport.open(url));
        self.state = ConsumerState::Connecting;
        self.deadline = Some(Instant::now() + self.timeout);

        debug!(
            turns = self.history.len(),
            images = request.images.len(),
            "Stream requested"
        );
        Ok(())
    }

    /// Apply one transport event. Returns the delta text when one was appended.
    ///
    /// Events outside `Connecting`/`Streaming` are rejected without touching
    /// any state.
    pub fn handle(&mut self, event: TransportEvent) -> Result<Option<String>> {
        if !self.state.is_active() {
            let err = ClientError::UnexpectedEvent {
                state: self.state,
                event: event.kind(),
            };
            warn!(error = %err, "Dropping transport event");
            return Err(err);
        }

        match event {
            TransportEvent::Open => {
                self.enter_streaming();
                Ok(None)
            }
            TransportEvent::Message(data) => {
                self.enter_streaming();
                Ok(self.apply_frame(&data))
            }
            TransportEvent::Error(detail) => {
                let message = if self.state == ConsumerState::Connecting {
                    CONNECT_FAILED_MESSAGE
                } else {
                    CONNECTION_LOST_MESSAGE
                };
                warn!(state = %self.state, %detail, "Transport error");
                self.finish(ConsumerState::Errored, Some(message.to_string()));
                Ok(None)
            }
        }
    }

    /// Fire the connect timeout. Only has an effect while `Connecting`.
    pub fn on_timeout(&mut self) -> bool {
        if self.state != ConsumerState::Connecting {
            return false;
        }
        warn!(timeout = ?self.timeout, "No response from server before timeout");
        self.finish(ConsumerState::Errored, Some(TIMEOUT_MESSAGE.to_string()));
        true
    }

    /// Drive the active source until a terminal state, calling `on_delta` for
    /// each appended delta. Returns immediately when nothing is active.
    pub async fn run<F>(&mut self, mut on_delta: F) -> ConsumerState
    where
        F: FnMut(&str),
    {
        while self.state.is_active() {
            let Some(source) = self.source.as_mut() else {
                let _ = self.handle(TransportEvent::Error("no event source".to_string()));
                continue;
            };

            let next = match (self.state, self.deadline) {
                (ConsumerState::Connecting, Some(deadline)) => {
                    match tokio::time::timeout_at(deadline, source.next_event()).await {
                        Ok(next) => next,
                        Err(_) => {
                            self.on_timeout();
                            continue;
                        }
                    }
                }
                _ => source.next_event().await,
            };

            let event =
                next.unwrap_or_else(|| TransportEvent::Error("event source closed".to_string()));
            if let Ok(Some(delta)) = self.handle(event) {
                on_delta(&delta);
            }
        }
        self.state
    }

    fn enter_streaming(&mut self) {
        if self.state == ConsumerState::Connecting {
            debug!("Stream open");
            self.state = ConsumerState::Streaming;
            self.deadline = None;
        }
    }

    fn apply_frame(&mut self, data: &str) -> Option<String> {
        match StreamEvent::parse(data) {
            Ok(StreamEvent::Delta { content }) if content.is_empty() => None,
            Ok(StreamEvent::Delta { content }) => {
                self.append_delta(&content);
                Some(content)
            }
            Ok(StreamEvent::Done) => {
                self.finish(ConsumerState::Done, None);
                None
            }
            Ok(StreamEvent::Error { message }) => {
                warn!(%message, "Server reported stream error");
                self.finish(ConsumerState::Errored, Some(format!("Error: {message}")));
                None
            }
            Err(err) => {
                warn!(error = %err, frame = data, "Ignoring unreadable frame");
                None
            }
        }
    }

    /// Extend the in-progress assistant turn with `delta`, or start one.
    fn append_delta(&mut self, delta: &str) {
        if self.in_progress
            && let Some(last) = self.history.last_mut()
        {
            last.content.push_text(delta);
            return;
        }
        self.history.push(Message::assistant(delta));
        self.in_progress = true;
    }

    fn finish(&mut self, state: ConsumerState, synthetic: Option<String>) {
        self.in_progress = false;
        if let Some(text) = synthetic {
            self.history.push(Message::assistant(text));
        }
        self.close_source();
        self.deadline = None;
        self.state = state;
        debug!(state = %self.state, turns = self.history.len(), "Stream finished");
    }

    fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl<T: Transport> Drop for StreamConsumer<T> {
    fn drop(&mut self) {
        self.close_source();
    }
}
