//! Generative backend collaborator: an OpenAI-compatible HTTP API.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tracing::debug;

use crate::api::{ChatRequest, ChatResponse, ImageRequest, ImageResponse};
use crate::utils::url::construct_api_url;

const STREAM_CLOSED_EARLY: &str = "stream closed before completion";

/// One decoded item of a completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    /// The backend signalled the end of the answer.
    Done,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, BackendError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Could not reach the backend at all.
    Request(String),
    /// The backend answered with a non-success status.
    Status { status: u16, message: String },
    /// The stream or body could not be decoded.
    Decode(String),
    /// The backend refused to produce an image for the prompt.
    Image(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Request(err) => write!(f, "backend request failed: {err}"),
            BackendError::Status { status, message } => {
                write!(f, "backend returned {status}: {message}")
            }
            BackendError::Decode(err) => write!(f, "backend response malformed: {err}"),
            BackendError::Image(err) => write!(f, "image generation failed: {err}"),
        }
    }
}

impl StdError for BackendError {}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming completion. Resolves once the backend accepted the
    /// request; chunks then arrive in the order the backend produced them.
    async fn stream_complete(&self, request: ChatRequest) -> Result<ChunkStream, BackendError>;

    /// Generate one image and return its PNG bytes.
    async fn generate_image(&self, prompt: &str, model: &str) -> Result<Vec<u8>, BackendError>;
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(construct_api_url(&self.base_url, endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(BackendError::Status {
                status,
                message: summarize_api_error(&error_text),
            });
        }
        Ok(response)
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Decode one SSE line. `None` for lines that carry nothing for the consumer.
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<Vec<StreamChunk>, BackendError>> {
    let payload = extract_data_payload(line.trim())?;
    if payload == "[DONE]" {
        return Some(Ok(vec![StreamChunk::Done]));
    }
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let mut chunks = Vec::new();
            if let Some(choice) = response.choices.first() {
                if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
                    chunks.push(StreamChunk::Text(content.clone()));
                }
                if choice.finish_reason.as_deref().is_some_and(|r| !r.is_empty()) {
                    chunks.push(StreamChunk::Done);
                }
            }
            Some(Ok(chunks))
        }
        Err(_) => Some(Err(BackendError::Decode(summarize_api_error(payload)))),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub(crate) fn summarize_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Split a byte stream into SSE lines and decode them into chunks.
pub(crate) fn sse_chunks<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(decode_sse(bytes))
}

fn decode_sse<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamChunk, BackendError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        buffer: Vec<u8>,
        pending: std::collections::VecDeque<Result<StreamChunk, BackendError>>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: std::collections::VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if matches!(item, Ok(StreamChunk::Done) | Err(_)) {
                    state.finished = true;
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            while let Some(newline_pos) = memchr(b'\n', &state.buffer) {
                let line: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                match std::str::from_utf8(&line) {
                    Ok(line) => {
                        if let Some(decoded) = parse_sse_line(line) {
                            match decoded {
                                Ok(chunks) => state.pending.extend(chunks.into_iter().map(Ok)),
                                Err(err) => state.pending.push_back(Err(err)),
                            }
                        }
                    }
                    Err(err) => debug!("skipping invalid UTF-8 in stream: {err}"),
                }
            }
            if !state.pending.is_empty() {
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    state.pending.push_back(Err(BackendError::Request(err.to_string())));
                }
                // Connection closed without `[DONE]` or a finish reason: the answer is truncated.
                None => {
                    state.buffer.push(b'\n');
                    let tail = std::mem::take(&mut state.buffer);
                    if let Ok(line) = std::str::from_utf8(&tail) {
                        if let Some(decoded) = parse_sse_line(line) {
                            match decoded {
                                Ok(chunks) => state.pending.extend(chunks.into_iter().map(Ok)),
                                Err(err) => state.pending.push_back(Err(err)),
                            }
                        }
                    }
                    if !state.pending.iter().any(|item| matches!(item, Ok(StreamChunk::Done))) {
                        state.pending.push_back(Err(BackendError::Request(
                            STREAM_CLOSED_EARLY.to_string(),
                        )));
                    }
                }
            }
        }
    })
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn stream_complete(&self, request: ChatRequest) -> Result<ChunkStream, BackendError> {
        debug!(model = %request.model, messages = request.messages.len(), "opening completion stream");
        let response = self.post_json("chat/completions", &request).await?;
        Ok(sse_chunks(response.bytes_stream()))
    }

    async fn generate_image(&self, prompt: &str, model: &str) -> Result<Vec<u8>, BackendError> {
        let request = ImageRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            size: "1024x1024".to_string(),
            response_format: "b64_json".to_string(),
            n: 1,
        };
        let response = self
            .post_json("images/generations", &request)
            .await
            .map_err(|err| match err {
                BackendError::Status { message, .. } => BackendError::Image(message),
                other => other,
            })?;
        let body: ImageResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        let encoded = body
            .data
            .into_iter()
            .next()
            .and_then(|image| image.b64_json)
            .ok_or_else(|| BackendError::Image("no image returned".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|err| BackendError::Decode(err.to_string()))
    }
}
