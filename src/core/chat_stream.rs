use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::models::fetch_models;
use crate::api::{ApiError, ApiOperation, ChatCompletionRequest, CompletionChunk, ModelsResponse};
use crate::core::endpoint::{resolve_endpoint, EndpointKind, ResolvedEndpoint};
use crate::core::sse::{SseDecoder, SseError};

/// Chunks buffered between the network task and the consumer.
const CHUNK_BUFFER: usize = 1;

pub type ChunkResult = Result<CompletionChunk, ApiError>;

/// Connection settings handed to the client; the client never reads global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Something that can open a streamed chat completion.
pub trait ChatBackend: Send + Sync {
    fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        cancel_token: CancellationToken,
    ) -> ChatStream;
}

/// Forward-only sequence of completion chunks for one request.
///
/// Ends cleanly (`None`) when the server finishes or when the cancellation
/// token fires; buffered chunks are dropped once cancelled.
pub struct ChatStream {
    rx: mpsc::Receiver<ChunkResult>,
    cancel_token: CancellationToken,
}

impl ChatStream {
    pub fn channel(
        cancel_token: CancellationToken,
        capacity: usize,
    ) -> (mpsc::Sender<ChunkResult>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, cancel_token })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Like `next()`, but also wakes up when the token fires while the
    /// producer is idle.
    pub async fn next_chunk(&mut self) -> Option<ChunkResult> {
        let cancel_token = self.cancel_token.clone();
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                self.rx.close();
                None
            }
            item = self.next() => item,
        }
    }
}

impl Stream for ChatStream {
    type Item = ChunkResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancel_token.is_cancelled() {
            this.rx.close();
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: ResolvedEndpoint,
}

impl ChatClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    pub fn with_http_client(http: reqwest::Client, config: &ClientConfig) -> Result<Self, ApiError> {
        let endpoint = resolve_endpoint(&config.base_url, &config.api_key)?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    pub async fn list_models(&self) -> Result<ModelsResponse, ApiError> {
        fetch_models(&self.http, &self.endpoint).await
    }

    /// Round-trip time of a minimal request in milliseconds, or `None` when
    /// the server could not be reached. Never fails.
    ///
    /// Webhooks are probed with `HEAD`; many of them reject it with
    /// `405 Method Not Allowed`, which still proves the endpoint exists.
    pub async fn check_connection(&self) -> Option<u64> {
        let (method, url) = self.endpoint.probe_target();
        let started = Instant::now();
        let response = self
            .http
            .request(method, url)
            .headers(self.endpoint.headers.clone())
            .send()
            .await;
        let elapsed = started.elapsed();

        let status = match response {
            Ok(response) => response.status(),
            Err(err) => {
                warn!(url = %url, error = %err, "Connection check failed");
                return None;
            }
        };

        let reachable = status.is_success()
            || (self.endpoint.kind == EndpointKind::Webhook
                && status == StatusCode::METHOD_NOT_ALLOWED);
        if !reachable {
            warn!(url = %url, %status, "Connection check rejected");
            return None;
        }

        Some((elapsed.as_secs_f64() * 1000.0).round() as u64)
    }

    /// Issue the request on a background task and return its chunk stream.
    pub fn spawn_stream(
        &self,
        request: ChatCompletionRequest,
        cancel_token: CancellationToken,
    ) -> ChatStream {
        let (tx, stream) = ChatStream::channel(cancel_token.clone(), CHUNK_BUFFER);
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let request = request.into_streaming();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!(url = %endpoint.chat_url, "Chat stream cancelled");
                }
                result = pump_chunks(&http, &endpoint, &request, &tx) => {
                    if let Err(err) = result {
                        debug!(url = %endpoint.chat_url, error = %err, "Chat stream failed");
                        let _ = tx.send(Err(err)).await;
                    }
                }
            }
        });

        stream
    }
}

impl ChatBackend for ChatClient {
    fn stream_chat(
        &self,
        request: ChatCompletionRequest,
        cancel_token: CancellationToken,
    ) -> ChatStream {
        self.spawn_stream(request, cancel_token)
    }
}

async fn pump_chunks(
    http: &reqwest::Client,
    endpoint: &ResolvedEndpoint,
    request: &ChatCompletionRequest,
    tx: &mpsc::Sender<ChunkResult>,
) -> Result<(), ApiError> {
    debug!(url = %endpoint.chat_url, kind = ?endpoint.kind, model = %request.model, "Sending chat request");
    let response = http
        .post(&endpoint.chat_url)
        .headers(endpoint.headers.clone())
        .json(request)
        .send()
        .await
        .map_err(|err| ApiError::from_reqwest(ApiOperation::Chat, err))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ApiError::http_status(ApiOperation::Chat, status, &error_text));
    }

    if response.content_length() == Some(0) {
        return Err(ApiError::missing_body());
    }

    let mut events = SseDecoder::new(response.bytes_stream());
    while let Some(event) = events.next().await {
        let event = event.map_err(|err| match err {
            SseError::Transport(err) => ApiError::wrap(ApiOperation::Chat, Box::new(err)),
            SseError::InvalidUtf8(err) => ApiError::unexpected(ApiOperation::Chat, err),
        })?;
        if event.data.trim().is_empty() {
            continue;
        }
        let chunk = parse_chunk(&event.data)?;
        if tx.send(Ok(chunk)).await.is_err() {
            debug!("Chat stream receiver dropped");
            return Ok(());
        }
    }

    debug!(url = %endpoint.chat_url, "Chat stream finished");
    Ok(())
}

fn parse_chunk(payload: &str) -> Result<CompletionChunk, ApiError> {
    let value = serde_json::from_str::<serde_json::Value>(payload)
        .map_err(|err| ApiError::unexpected(ApiOperation::Chat, err))?;

    if value.get("error").is_some() {
        let summary = extract_error_summary(&value)
            .filter(|summary| !summary.is_empty())
            .unwrap_or_else(|| value.to_string());
        return Err(ApiError::new(format!("Server reported an error: {summary}")));
    }

    serde_json::from_value(value).map_err(|err| ApiError::unexpected(ApiOperation::Chat, err))
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}
