//! Event-stream transport seam.
//!
//! The consumer only sees [`TransportEvent`]s from an [`EventSource`]. The
//! HTTP implementation reads the response on a background task and forwards
//! decoded frame payloads over a channel.

use async_trait::async_trait;
use futures::StreamExt;
use inkstream_models::SseDecoder;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

const CHANNEL_CAPACITY: usize = 64;
const EVENT_STREAM: &str = "text/event-stream";

/// What an open event source reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Response headers accepted; the stream is live.
    Open,
    /// One frame's `data` payload.
    Message(String),
    /// The connection failed or ended. Carries a description for logs.
    Error(String),
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
        }
    }
}

/// One live connection.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is closed or exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Release the connection. Idempotent.
    fn close(&mut self);
}

/// Opens event sources. Opening never fails synchronously; failures arrive as
/// [`TransportEvent::Error`].
pub trait Transport: Send + Sync {
    type Source: EventSource;

    fn open(&self, url: Url) -> Self::Source;
}

/// reqwest-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    type Source = HttpEventSource;

    fn open(&self, url: Url) -> Self::Source {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(read_stream(self.client.clone(), url, tx));
        HttpEventSource {
            events: rx,
            task: Some(task),
        }
    }
}

pub struct HttpEventSource {
    events: mpsc::Receiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Closing event source");
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for HttpEventSource {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_stream(client: reqwest::Client, url: Url, tx: mpsc::Sender<TransportEvent>) {
    let response = match client
        .get(url)
        .header(ACCEPT, EVENT_STREAM)
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(TransportEvent::Error(err.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let _ = tx
            .send(TransportEvent::Error(format!("HTTP {status}: {body}")))
            .await;
        return;
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with(EVENT_STREAM) {
        let _ = tx
            .send(TransportEvent::Error(format!(
                "Unexpected content type {content_type:?}"
            )))
            .await;
        return;
    }

    if tx.send(TransportEvent::Open).await.is_err() {
        return;
    }

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx.send(TransportEvent::Error(err.to_string())).await;
                return;
            }
        };
        for data in decoder.push(&chunk) {
            if tx.send(TransportEvent::Message(data)).await.is_err() {
                return;
            }
        }
    }

    for data in decoder.finish() {
        if tx.send(TransportEvent::Message(data)).await.is_err() {
            return;
        }
    }
    // The consumer stops reading at the terminal frame, so this is only seen
    // when the body ends without one.
    let _ = tx
        .send(TransportEvent::Error("stream ended".to_string()))
        .await;
}
