//! Streaming controller: HTTP transport, stream consumption and the tool loop.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::providers::{ChatRequest, LlmApi, ProviderPayload, StreamDelta, StreamProtocol, create_api};
use super::stream::smoothing::{FRAME_INTERVAL, frame_ticker};
use super::stream::{
    ChatCompletion, ChatEvent, ChatStream, EventSink, RateLimiter, ToolCallAccumulator, channel,
};
use crate::chat::capability;
use crate::config::AccessConfig;
use crate::tools::ToolRegistry;
use crate::types::ChatMessageTool;

pub const DONE_SENTINEL: &str = "[DONE]";
const UNAUTHORIZED_HINT: &str =
    "Unauthorized: the API key is missing or invalid for this provider.";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request to {model} timed out after {secs}s")]
    Timeout { model: String, secs: u64 },

    #[error("empty response from server")]
    EmptyResponse,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("empty input")]
    EmptyInput,
}

impl ChatError {
    /// A non-2xx response. JSON bodies are pretty-printed.
    pub fn status(status: u16, body: &str) -> Self {
        let mut body = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| body.to_string());
        if status == 401 {
            body = format!("{UNAUTHORIZED_HINT}\n\n{body}");
        }
        ChatError::Status { status, body }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ChatError::Status { status, .. } => Some(*status),
            ChatError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Entry point for chat requests against any provider.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    access: AccessConfig,
    tools: Option<Arc<ToolRegistry>>,
}

impl ChatClient {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            access,
            tools: None,
        }
    }

    /// Execute tool calls through `registry`.
    pub fn with_tools(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tools = Some(registry);
        self
    }

    pub fn access(&self) -> &AccessConfig {
        &self.access
    }

    pub fn tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools.as_ref()
    }

    pub fn api(&self, request: &ChatRequest) -> Arc<dyn LlmApi> {
        create_api(request.config.provider_name, &self.access)
    }

    /// Start a chat with the adapter for the request's provider.
    pub fn chat(&self, request: ChatRequest) -> ChatStream {
        let api = self.api(&request);
        self.chat_with(api, request)
    }

    pub fn chat_with(&self, api: Arc<dyn LlmApi>, request: ChatRequest) -> ChatStream {
        let (sink, events) = channel();
        let cancel = CancellationToken::new();
        let worker = Worker {
            http: self.http.clone(),
            proxy_origin: self.access.proxy_origin.clone(),
            direct: self.access.direct,
            api,
            tools: self.tools.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(worker.run(request, sink));
        ChatStream::new(events, cancel, handle)
    }

    /// Run `request` to completion and return the final text.
    pub async fn complete(&self, request: ChatRequest) -> ChatResult<String> {
        let completion = self.chat(request).collect_completion().await?;
        Ok(completion.content)
    }
}

#[derive(Debug, Default)]
struct Progress {
    content: String,
    reasoning: String,
    status: Option<u16>,
    streamed: bool,
}

impl Progress {
    fn completion(&self, aborted: bool) -> ChatCompletion {
        ChatCompletion {
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
            status: self.status,
            aborted,
        }
    }

    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }
}

/// One decoded `data:` payload.
enum Chunk {
    Skip,
    Done,
    Delta(StreamDelta),
}

struct Worker {
    http: reqwest::Client,
    proxy_origin: String,
    direct: bool,
    api: Arc<dyn LlmApi>,
    tools: Option<Arc<ToolRegistry>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, request: ChatRequest, mut sink: EventSink) {
        let provider = self.api.provider();
        let model = request.config.model.clone();
        let mut progress = Progress::default();
        let cancel = self.cancel.clone();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.drive(request, &mut progress, &mut sink) => Some(result),
        };

        let event = match result {
            None => {
                info!(%provider, %model, "chat aborted");
                ChatEvent::Done(progress.completion(true))
            }
            Some(Ok(())) if progress.streamed && progress.is_empty() => {
                warn!(%provider, %model, "stream finished without content");
                ChatEvent::Failed(ChatError::EmptyResponse)
            }
            Some(Ok(())) => {
                debug!(%provider, %model, chars = progress.content.len(), "chat finished");
                ChatEvent::Done(progress.completion(false))
            }
            Some(Err(err)) => {
                error!(%provider, %model, error = %err, "chat failed");
                ChatEvent::Failed(err)
            }
        };
        sink.send(event);
    }

    async fn drive(
        &self,
        request: ChatRequest,
        progress: &mut Progress,
        sink: &mut EventSink,
    ) -> ChatResult<()> {
        let model = request.config.model.clone();
        let path = self.api.path(&self.api.chat_path(&model));
        let url = resolve_url(&path, self.direct, &self.proxy_origin);
        let url = self.api.authorize_url(&self.http, url).await?;
        let headers = self.api.headers(&request);

        let mut payload = self.api.build_payload(&request);
        progress.streamed = payload.is_stream();
        loop {
            let response = self.send(&url, &headers, &payload, &model).await?;
            progress.status = Some(response.status().as_u16());

            if !progress.streamed {
                let body = response.text().await?;
                let value: Value = serde_json::from_str(&body)?;
                let content = self.api.extract_message(&value, &model);
                if !content.is_empty() {
                    sink.send(ChatEvent::TextDelta(content.clone()));
                }
                progress.content = content;
                return Ok(());
            }

            let round_start = progress.content.len();
            let calls = match self.api.stream_protocol() {
                StreamProtocol::EventSource => {
                    return self.consume_event_source(response, progress, sink).await;
                }
                StreamProtocol::Chunked => self.consume_chunked(response, progress, sink).await?,
            };
            if calls.is_empty() {
                return Ok(());
            }
            let Some(registry) = self.tools.clone() else {
                warn!(calls = calls.len(), "model requested tools but no registry is attached");
                return Ok(());
            };
            let results = run_tools(&registry, &calls, sink).await;
            let round_text = &progress.content[round_start..];
            if !payload.push_tool_round(round_text, &calls, &results) {
                return Ok(());
            }
            debug!(calls = calls.len(), "re-issuing request with tool results");
        }
    }

    async fn send(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        payload: &ProviderPayload,
        model: &str,
    ) -> ChatResult<reqwest::Response> {
        let body = payload.to_body()?;
        debug!(provider = %self.api.provider(), %url, "sending chat request");
        let mut builder = self.http.post(url).json(&body);
        if payload.is_stream() {
            builder = builder.header("Accept", "text/event-stream");
        }
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }

        let limit = capability::request_timeout(model);
        let response = tokio::time::timeout(limit, builder.send())
            .await
            .map_err(|_| timeout_error(model, limit))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::status(status.as_u16(), &body));
        }
        Ok(response)
    }

    fn parse_chunk(&self, data: &str) -> ChatResult<Chunk> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Chunk::Skip);
        }
        if data == DONE_SENTINEL {
            return Ok(Chunk::Done);
        }
        match self.api.parse_stream_data(data) {
            Ok(StreamDelta {
                error: Some(message),
                ..
            }) => Err(ChatError::Provider(message)),
            Ok(delta) => Ok(Chunk::Delta(delta)),
            Err(err) => {
                warn!(error = %err, data, "skipping malformed stream chunk");
                Ok(Chunk::Skip)
            }
        }
    }

    /// Chunked `data:` events; returns the tool calls requested by the model.
    async fn consume_chunked(
        &self,
        response: reqwest::Response,
        progress: &mut Progress,
        sink: &mut EventSink,
    ) -> ChatResult<Vec<ChatMessageTool>> {
        let mut calls = ToolCallAccumulator::new();
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event =
                event.map_err(|err| ChatError::Provider(format!("event stream error: {err}")))?;
            match self.parse_chunk(&event.data)? {
                Chunk::Done => return Ok(calls.take()),
                Chunk::Skip => {}
                Chunk::Delta(delta) => emit_delta(delta, &mut calls, progress, sink),
            }
        }
        Ok(calls.take())
    }

    /// Event-source consumption with smoothed release of buffered text.
    async fn consume_event_source(
        &self,
        response: reqwest::Response,
        progress: &mut Progress,
        sink: &mut EventSink,
    ) -> ChatResult<()> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        // A plain-text body is the whole answer.
        if content_type.starts_with("text/plain") {
            let text = response.text().await?;
            if !text.is_empty() {
                sink.send(ChatEvent::TextDelta(text.clone()));
            }
            progress.content = text;
            return Ok(());
        }
        if !content_type.starts_with("text/event-stream") {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::status(status, &body));
        }

        let mut limiter = RateLimiter::default();
        let mut ticker = frame_ticker(FRAME_INTERVAL);
        let mut events = response.bytes_stream().eventsource();
        let mut open = true;

        while open {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) => match self.parse_chunk(&event.data)? {
                        Chunk::Done => open = false,
                        Chunk::Skip => {}
                        Chunk::Delta(delta) => {
                            if let Some(reasoning) = delta.reasoning {
                                progress.reasoning.push_str(&reasoning);
                                sink.send(ChatEvent::ThinkingDelta(reasoning));
                            }
                            if let Some(content) = delta.content {
                                limiter.push(&content);
                            }
                        }
                    },
                    Some(Err(err)) => {
                        return Err(ChatError::Provider(format!("event stream error: {err}")));
                    }
                    None => open = false,
                },
                _ = ticker.tick() => {
                    if let Some(piece) = limiter.tick() {
                        progress.content.push_str(&piece);
                        sink.send(ChatEvent::TextDelta(piece));
                    }
                }
            }
        }

        let rest = limiter.drain();
        if !rest.is_empty() {
            progress.content.push_str(&rest);
            sink.send(ChatEvent::TextDelta(rest));
        }
        Ok(())
    }
}

fn emit_delta(
    delta: StreamDelta,
    calls: &mut ToolCallAccumulator,
    progress: &mut Progress,
    sink: &mut EventSink,
) {
    if let Some(reasoning) = delta.reasoning {
        progress.reasoning.push_str(&reasoning);
        sink.send(ChatEvent::ThinkingDelta(reasoning));
    }
    if let Some(content) = delta.content {
        progress.content.push_str(&content);
        sink.send(ChatEvent::TextDelta(content));
    }
    for call in delta.tool_calls {
        calls.push(&call);
        sink.send(ChatEvent::ToolCallDelta(call));
    }
}

fn timeout_error(model: &str, limit: Duration) -> ChatError {
    ChatError::Timeout {
        model: model.to_string(),
        secs: limit.as_secs(),
    }
}

/// Relative proxy paths are resolved against the proxy origin.
pub fn resolve_url(path: &str, direct: bool, proxy_origin: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if direct {
        warn!(%path, "relative endpoint in direct mode; resolving against proxy origin");
    }
    format!("{}{}", proxy_origin.trim_end_matches('/'), path)
}

/// Execute every call, reporting start and finish. Failures are recorded on
/// the call rather than aborting the exchange.
pub async fn run_tools(
    registry: &ToolRegistry,
    calls: &[ChatMessageTool],
    sink: &mut EventSink,
) -> Vec<ChatMessageTool> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        sink.send(ChatEvent::ToolStarted(call.clone()));
        let (name, arguments) = call
            .function
            .as_ref()
            .map(|f| (f.name.as_str(), f.arguments.as_str()))
            .unwrap_or_default();
        let mut result = call.clone();
        match registry.call(name, arguments).await {
            Ok(output) => result.content = Some(output),
            Err(err) => {
                warn!(tool = name, error = %err, "tool call failed");
                result.is_error = true;
                result.error_msg = Some(err.to_string());
            }
        }
        sink.send(ChatEvent::ToolFinished(result.clone()));
        results.push(result);
    }
    results
}
