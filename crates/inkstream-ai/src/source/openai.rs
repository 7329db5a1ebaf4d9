//! Live upstream token source for OpenAI-compatible chat completion APIs

use async_trait::async_trait;
use futures::StreamExt;
use inkstream_models::{ContentPart, Message, MessageContent, Role, SseDecoder};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::retry::{RetryPolicy, response_to_error};
use super::{DeltaStream, TokenSource};
use crate::error::{AiError, Result};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-vision-preview";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MAX_TOKENS: u32 = 2000;

const PROVIDER: &str = "OpenAI";

/// OpenAI streaming token source
pub struct OpenAiTokenSource {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    retry_policy: RetryPolicy,
}

impl OpenAiTokenSource {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            max_tokens: DEFAULT_OPENAI_MAX_TOKENS,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Use a preconfigured HTTP client, e.g. one with custom proxy settings.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set custom base URL (for API-compatible services)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_with_retry(&self, body: &OpenAiRequest<'_>) -> Result<Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0;

        loop {
            let error = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => response_to_error(response, PROVIDER).await,
                Err(err) => AiError::Http(err),
            };

            if !error.is_retryable() || attempt >= self.retry_policy.max_retries {
                return Err(error);
            }

            attempt += 1;
            let delay = self.retry_policy.delay_for(attempt, error.retry_after());
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying OpenAI stream request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    stream: bool,
}

/// Chat message in the provider's request shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiMessage {
    pub role: &'static str,
    pub content: OpenAiContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiImageUrl {
    pub url: String,
}

/// Map conversation turns onto the OpenAI chat message shape.
///
/// Structured content that holds only text is flattened to a plain string,
/// since text-only models reject part arrays.
pub fn to_openai_messages(conversation: &[Message]) -> Vec<OpenAiMessage> {
    conversation
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };

            let content = match &message.content {
                MessageContent::Text(text) => OpenAiContent::Text(text.clone()),
                MessageContent::Parts(parts)
                    if parts
                        .iter()
                        .all(|part| matches!(part, ContentPart::Text { .. })) =>
                {
                    OpenAiContent::Text(message.content.text())
                }
                MessageContent::Parts(parts) => OpenAiContent::Parts(
                    parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text { text } => OpenAiPart::Text { text: text.clone() },
                            ContentPart::ImageUrl { image_url } => OpenAiPart::ImageUrl {
                                image_url: OpenAiImageUrl {
                                    url: image_url.url.clone(),
                                },
                            },
                        })
                        .collect(),
                ),
            };

            OpenAiMessage { role, content }
        })
        .collect()
}

// Streaming types

#[derive(Deserialize, Debug)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Deserialize, Debug)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize, Debug)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OpenAiStreamError {
    message: String,
}

enum Frame {
    Deltas(Vec<String>),
    Done,
    Failed(AiError),
}

fn parse_frame(data: &str) -> Frame {
    if data.trim() == "[DONE]" {
        return Frame::Done;
    }

    let parsed: OpenAiStreamResponse = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(error = %err, "Skipping unparseable OpenAI stream frame");
            return Frame::Deltas(Vec::new());
        }
    };

    if let Some(error) = parsed.error {
        return Frame::Failed(AiError::Llm(error.message));
    }

    Frame::Deltas(
        parsed
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .collect(),
    )
}

#[async_trait]
impl TokenSource for OpenAiTokenSource {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open(&self, conversation: Vec<Message>) -> Result<DeltaStream> {
        let body = OpenAiRequest {
            model: &self.model,
            messages: to_openai_messages(&conversation),
            max_tokens: self.max_tokens,
            stream: true,
        };

        let response = self.send_with_retry(&body).await?;
        tracing::debug!(model = %self.model, turns = conversation.len(), "OpenAI stream opened");

        Ok(Box::pin(async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(AiError::Llm(format!("Stream error: {}", e)));
                        return;
                    }
                };

                for data in decoder.push(&chunk) {
                    match parse_frame(&data) {
                        Frame::Deltas(deltas) => {
                            for delta in deltas {
                                yield Ok(delta);
                            }
                        }
                        Frame::Done => return,
                        Frame::Failed(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            // Body ended without [DONE]; salvage a final unterminated frame.
            for data in decoder.finish() {
                match parse_frame(&data) {
                    Frame::Deltas(deltas) => {
                        for delta in deltas {
                            yield Ok(delta);
                        }
                    }
                    Frame::Done => return,
                    Frame::Failed(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn local_source(api_key: &str) -> OpenAiTokenSource {
        let client = Client::builder().no_proxy().build().unwrap();
        OpenAiTokenSource::new(api_key).with_client(client)
    }

    fn sse_body(frames: &[&str]) -> String {
        frames
            .iter()
            .map(|frame| format!("data: {frame}\n\n"))
            .collect()
    }

    fn delta_frame(content: &str) -> String {
        json!({"choices": [{"index": 0, "delta": {"content": content}}]}).to_string()
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn maps_plain_and_multimodal_messages() {
        let conversation = vec![
            Message::system("be helpful"),
            Message::assistant("hi"),
            Message::user_with_images("what is this", ["https://img/a.png"]),
        ];

        let mapped = serde_json::to_value(to_openai_messages(&conversation)).unwrap();
        assert_eq!(
            mapped,
            json!([
                {"role": "system", "content": "be helpful"},
                {"role": "assistant", "content": "hi"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "https://img/a.png"}}
                ]}
            ])
        );
    }

    #[test]
    fn text_only_parts_are_flattened() {
        let message = Message::new(
            Role::User,
            MessageContent::parts(vec![ContentPart::text("a"), ContentPart::text("b")]).unwrap(),
        );
        let mapped = to_openai_messages(&[message]);
        assert_eq!(mapped[0].content, OpenAiContent::Text("ab".to_string()));
    }

    #[tokio::test]
    async fn streams_deltas_in_arrival_order() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            &delta_frame("Hel"),
            &json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]}).to_string(),
            &delta_frame("lo"),
            &delta_frame(" world"),
            "[DONE]",
        ]);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = local_source("sk-test").with_base_url(server.uri());
        let stream = source.open(vec![Message::user("hi")]).await.unwrap();
        let deltas: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect();

        assert_eq!(deltas, vec!["Hel", "lo", " world"]);
    }

    #[tokio::test]
    async fn request_body_carries_stream_flag_and_limits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(wiremock::matchers::body_partial_json(json!({
                "model": "gpt-test",
                "stream": true,
                "max_tokens": 64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["[DONE]"])))
            .expect(1)
            .mount(&server)
            .await;

        let source = local_source("sk-test")
            .with_base_url(server.uri())
            .with_model("gpt-test")
            .with_max_tokens(64);
        let items = collect(source.open(vec![Message::user("hi")]).await.unwrap()).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let source = local_source("sk-bad").with_base_url(server.uri());
        let err = match source.open(vec![Message::user("hi")]).await {
            Ok(_) => panic!("open should fail on 401"),
            Err(err) => err,
        };

        assert!(matches!(err, AiError::LlmHttp { status: 401, .. }));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn retries_rate_limited_open() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(sse_body(&[&delta_frame("ok"), "[DONE]"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = local_source("sk-test").with_base_url(server.uri());
        let items = collect(source.open(vec![Message::user("hi")]).await.unwrap()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "ok");
    }

    #[tokio::test]
    async fn upstream_error_frame_ends_stream_with_error() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            &delta_frame("partial"),
            &json!({"error": {"message": "model overloaded"}}).to_string(),
            &delta_frame("never seen"),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let source = local_source("sk-test").with_base_url(server.uri());
        let items = collect(source.open(vec![Message::user("hi")]).await.unwrap()).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        let err = items[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }
}
