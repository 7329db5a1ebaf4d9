//! Streaming chat dispatcher.
//!
//! `GET /api/chat?message=..&images=..&history=..` answers with an event stream:
//! one `{"content": ..}` frame per non-empty delta, then exactly one terminal
//! frame, `[DONE]` or `{"error": ..}`. Anything that fails before the stream
//! opens is a JSON error response instead.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use inkstream_ai::DeltaStream;
use inkstream_models::{ChatQuery, ChatRequest, StreamEvent};
use std::convert::Infallible;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, state::AppState};

// GET /api/chat
pub async fn stream_chat(
    State(state): State<AppState>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();

    let Query(query) = query.inspect_err(|err| {
        warn!(%request_id, error = %err, "Rejected malformed query string");
    })?;
    let request = ChatRequest::from_query(query).inspect_err(|err| {
        warn!(%request_id, error = %err, "Rejected chat request");
    })?;
    let conversation = request.conversation();

    info!(
        %request_id,
        source = state.token_source.name(),
        turns = conversation.len(),
        images = request.images.len(),
        "Opening chat stream"
    );

    let deltas = state
        .token_source
        .open(conversation)
        .await
        .inspect_err(|err| {
            error!(%request_id, error = %err, "Token source failed to open");
        })?;

    let events = frame_deltas(deltas, request_id)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_data())));

    let sse = Sse::new(events);
    let mut response = match state.keep_alive {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response(),
        None => sse.into_response(),
    };

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if state.allow_any_origin {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Cache-Control"),
        );
    }

    Ok(response)
}

/// Frame a delta stream as wire events.
///
/// Empty deltas are skipped. The output always ends with exactly one terminal
/// event unless the consumer drops it first.
pub fn frame_deltas(
    mut deltas: DeltaStream,
    request_id: Uuid,
) -> impl Stream<Item = StreamEvent> + Send {
    async_stream::stream! {
        let mut guard = StreamGuard::new(request_id);

        while let Some(item) = deltas.next().await {
            match item {
                Ok(delta) if delta.is_empty() => continue,
                Ok(delta) => {
                    guard.delivered += 1;
                    yield StreamEvent::Delta { content: delta };
                }
                Err(err) => {
                    guard.finished = true;
                    error!(%request_id, delivered = guard.delivered, error = %err, "Token source failed mid-stream");
                    yield StreamEvent::error(err.to_string());
                    return;
                }
            }
        }

        guard.finished = true;
        info!(%request_id, delivered = guard.delivered, "Chat stream completed");
        yield StreamEvent::Done;
    }
}

/// Logs streams dropped before their terminal frame, i.e. client disconnects.
struct StreamGuard {
    request_id: Uuid,
    delivered: usize,
    finished: bool,
}

impl StreamGuard {
    fn new(request_id: Uuid) -> Self {
        debug!(%request_id, "Chat stream started");
        Self {
            request_id,
            delivered: 0,
            finished: false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                request_id = %self.request_id,
                delivered = self.delivered,
                "Client disconnected before chat stream finished"
            );
        }
    }
}
