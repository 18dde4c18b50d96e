//! Provider adapters.
//!
//! Every backend implements [`LlmApi`]: endpoint resolution, payload
//! construction into the closed [`ProviderPayload`] set, stream chunk parsing
//! and non-streaming message extraction. Transport lives in `ai::client`.

pub mod alibaba;
pub mod baidu;
pub mod deepseek;
pub mod glm;
pub mod moonshot;
pub mod openai;
pub mod siliconflow;
pub mod tencent;
pub mod xai;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::ai::client::ChatResult;
use crate::ai::stream::ToolCallDelta;
use crate::chat::capability;
use crate::chat::normalize::{NormalizeOptions, normalize_content};
use crate::config::{AccessConfig, ModelConfig, ServiceProvider};
use crate::tools::ToolSpec;
use crate::types::{ChatMessageTool, MessageContent, RequestMessage, ToolFunction};

pub use alibaba::QwenApi;
pub use baidu::ErnieApi;
pub use deepseek::DeepSeekApi;
pub use glm::ChatGlmApi;
pub use moonshot::MoonshotApi;
pub use openai::OpenAiApi;
pub use siliconflow::SiliconFlowApi;
pub use tencent::HunyuanApi;
pub use xai::XaiApi;

/// One chat invocation as handed to an adapter.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<RequestMessage>,
    pub config: ModelConfig,
    pub stream: bool,
    pub tools: Vec<ToolSpec>,
}

/// Normalized content of one stream chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Error reported in-band by the provider.
    pub error: Option<String>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamProtocol {
    /// `data:` lines read straight off the chunked body.
    Chunked,
    /// Event-source consumption with smoothed release (Baidu, Tencent).
    EventSource,
}

#[async_trait]
pub trait LlmApi: Send + Sync {
    fn provider(&self) -> ServiceProvider;

    fn endpoint(&self) -> &Endpoint;

    fn path(&self, suffix: &str) -> String {
        self.endpoint().path(suffix)
    }

    /// Endpoint suffix for `model`.
    fn chat_path(&self, model: &str) -> String;

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload;

    fn headers(&self, _request: &ChatRequest) -> Vec<(&'static str, String)> {
        self.endpoint()
            .api_key()
            .map(|key| vec![("Authorization", format!("Bearer {key}"))])
            .unwrap_or_default()
    }

    fn stream_protocol(&self) -> StreamProtocol {
        StreamProtocol::Chunked
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error>;

    fn extract_message(&self, response: &Value, model: &str) -> String;

    /// Final adjustments to the request URL, such as appending an access token.
    async fn authorize_url(&self, _http: &reqwest::Client, url: String) -> ChatResult<String> {
        Ok(url)
    }
}

/// Base-URL resolution shared by all adapters.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub provider: ServiceProvider,
    pub public_base: &'static str,
    pub proxy_path: &'static str,
    pub access: AccessConfig,
}

impl Endpoint {
    pub fn new(
        provider: ServiceProvider,
        public_base: &'static str,
        proxy_path: &'static str,
        access: AccessConfig,
    ) -> Self {
        Self {
            provider,
            public_base,
            proxy_path,
            access,
        }
    }

    /// Custom override, else the public base when direct, else the proxy path.
    pub fn base_url(&self) -> String {
        let mut base = match self.access.custom_url(self.provider) {
            Some(url) => url.to_string(),
            None if self.access.direct => self.public_base.to_string(),
            None => self.proxy_path.to_string(),
        };
        if base.ends_with('/') {
            base.pop();
        }
        if !base.starts_with("http") && !base.starts_with(self.proxy_path) {
            base = format!("https://{base}");
        }
        base
    }

    pub fn path(&self, suffix: &str) -> String {
        let base = self.base_url();
        debug!(provider = %self.provider, %base, suffix, "resolved endpoint");
        format!("{base}/{suffix}")
    }

    pub fn api_key(&self) -> Option<&str> {
        self.access.api_key(self.provider)
    }

    pub fn normalize_options(&self, model: &str) -> NormalizeOptions {
        NormalizeOptions {
            vision: capability::is_vision_model(model, &self.access.extra_vision_models),
            files: false,
            accepts_parts: capability::accepts_content_parts(self.provider),
        }
    }

    /// Re-normalize outgoing messages under this provider's capabilities.
    pub fn normalize(&self, messages: &[RequestMessage], model: &str) -> Vec<RequestMessage> {
        let options = self.normalize_options(model);
        messages
            .iter()
            .map(|message| {
                RequestMessage::new(
                    message.role,
                    normalize_content(message.role, &message.content, options),
                )
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolFunction,
}

impl From<&ChatMessageTool> for WireToolCall {
    fn from(tool: &ChatMessageTool) -> Self {
        Self {
            id: tool.id.clone(),
            kind: tool.kind.clone().unwrap_or_else(|| "function".to_string()),
            function: tool.function.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolSpec,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: spec.clone(),
        }
    }
}

/// A message as a provider receives it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WireMessage<C> {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<C>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl<C> WireMessage<C> {
    pub fn new(role: impl Into<String>, content: C) -> Self {
        Self {
            role: role.into(),
            content: Some(content),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

impl<C: From<String>> WireMessage<C> {
    /// The assistant turn that requested `calls`, with any text streamed
    /// alongside them.
    pub fn tool_call_request(calls: &[ChatMessageTool], text: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: (!text.is_empty()).then(|| C::from(text.to_string())),
            name: None,
            tool_calls: calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: None,
        }
    }

    /// The `tool` turn carrying one call's result or error.
    pub fn tool_result(tool: &ChatMessageTool) -> Self {
        let content = if tool.is_error {
            tool.error_msg.clone().unwrap_or_default()
        } else {
            tool.content.clone().unwrap_or_default()
        };
        Self {
            role: "tool".to_string(),
            content: Some(C::from(content)),
            name: tool.function.as_ref().map(|f| f.name.clone()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool.id.clone()),
        }
    }
}

/// Flat OpenAI-style body, shared by most providers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionsPayload {
    pub messages: Vec<WireMessage<MessageContent>>,
    pub stream: bool,
    pub model: String,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

impl ChatCompletionsPayload {
    pub fn new(messages: Vec<RequestMessage>, request: &ChatRequest) -> Self {
        let config = &request.config;
        Self {
            messages: messages
                .into_iter()
                .map(|m| WireMessage::new(m.role.as_str(), m.content))
                .collect(),
            stream: request.stream,
            model: config.model.clone(),
            temperature: config.temperature,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            top_p: config.top_p,
            max_tokens: None,
            tools: request.tools.iter().map(WireTool::from).collect(),
        }
    }
}

/// The body actually sent, one variant per wire shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderPayload {
    ChatCompletions(ChatCompletionsPayload),
    Alibaba(alibaba::AlibabaPayload),
    Baidu(baidu::BaiduPayload),
    Tencent(tencent::TencentPayload),
    GlmImage(glm::GlmImagePayload),
    GlmVideo(glm::GlmVideoPayload),
}

impl ProviderPayload {
    pub fn to_body(&self) -> Result<Value, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        Ok(match self {
            ProviderPayload::Tencent(_) => capitalize_keys(value),
            _ => value,
        })
    }

    pub fn is_stream(&self) -> bool {
        match self {
            ProviderPayload::ChatCompletions(p) => p.stream,
            ProviderPayload::Alibaba(p) => p.parameters.incremental_output,
            ProviderPayload::Baidu(p) => p.stream,
            ProviderPayload::Tencent(p) => p.stream,
            ProviderPayload::GlmImage(_) | ProviderPayload::GlmVideo(_) => false,
        }
    }

    /// Append a tool-call turn and its results for the follow-up request.
    /// Returns false for shapes that cannot carry tool calls.
    pub fn push_tool_round(
        &mut self,
        text: &str,
        calls: &[ChatMessageTool],
        results: &[ChatMessageTool],
    ) -> bool {
        match self {
            ProviderPayload::ChatCompletions(p) => {
                p.messages.push(WireMessage::tool_call_request(calls, text));
                p.messages.extend(results.iter().map(WireMessage::tool_result));
                true
            }
            ProviderPayload::Alibaba(p) => {
                p.input.messages.push(WireMessage::tool_call_request(calls, text));
                p.input
                    .messages
                    .extend(results.iter().map(WireMessage::tool_result));
                true
            }
            _ => false,
        }
    }
}

/// snake_case keys to PascalCase, recursively.
pub fn capitalize_keys(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(capitalize_keys).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (capitalize_key(&key), capitalize_keys(value)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn capitalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = true;
    for c in key.chars() {
        if c == '_' {
            if upper_next {
                out.push(c);
            }
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper_next = false;
    }
    out
}

/// Shared OpenAI-compatible chunk shapes.
pub(crate) mod wire {
    use serde::Deserialize;
    use serde_json::Value;

    use super::StreamDelta;
    use crate::ai::stream::ToolCallDelta;

    #[derive(Debug, Deserialize)]
    pub struct ChunkResponse {
        #[serde(default)]
        pub choices: Vec<ChunkChoice>,
        #[serde(default)]
        pub error: Option<Value>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChunkChoice {
        #[serde(default)]
        pub delta: Option<ChunkDelta>,
        #[serde(default)]
        pub message: Option<ChunkDelta>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct ChunkDelta {
        #[serde(default)]
        pub content: Option<Value>,
        #[serde(default)]
        pub reasoning_content: Option<String>,
        #[serde(default)]
        pub tool_calls: Option<Vec<ChunkToolCall>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChunkToolCall {
        #[serde(default)]
        pub index: Option<usize>,
        #[serde(default)]
        pub id: Option<String>,
        #[serde(rename = "type", default)]
        pub kind: Option<String>,
        #[serde(default)]
        pub function: Option<ChunkFunction>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChunkFunction {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub arguments: Option<String>,
    }

    pub fn error_message(error: &Value) -> String {
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming")
            .to_string()
    }

    /// Text of a content field that is either a string or a list of `{text}` items.
    pub fn content_text(content: &Value) -> Option<String> {
        match content {
            Value::String(text) => Some(text.clone()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            _ => None,
        }
    }

    impl ChunkDelta {
        pub fn into_stream_delta(self, with_reasoning: bool) -> StreamDelta {
            StreamDelta {
                content: self
                    .content
                    .as_ref()
                    .and_then(content_text)
                    .filter(|text| !text.is_empty()),
                reasoning: self
                    .reasoning_content
                    .filter(|text| with_reasoning && !text.is_empty()),
                tool_calls: self
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| {
                        let (name, arguments) = call
                            .function
                            .map(|f| (f.name, f.arguments))
                            .unwrap_or((None, None));
                        ToolCallDelta {
                            index: call.index,
                            id: call.id,
                            kind: call.kind,
                            name,
                            arguments,
                        }
                    })
                    .collect(),
                error: None,
            }
        }
    }
}

/// Parse an OpenAI-compatible `chat.completion.chunk`.
pub fn parse_chat_completion_chunk(
    data: &str,
    with_reasoning: bool,
) -> Result<StreamDelta, serde_json::Error> {
    let chunk: wire::ChunkResponse = serde_json::from_str(data)?;
    if let Some(error) = chunk.error.as_ref() {
        return Ok(StreamDelta {
            error: Some(wire::error_message(error)),
            ..StreamDelta::default()
        });
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.or(choice.message))
        .map(|delta| delta.into_stream_delta(with_reasoning))
        .unwrap_or_default())
}

/// `choices[0].message.content` of a non-streaming OpenAI-style response.
pub fn extract_chat_completion(response: &Value) -> String {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Build the adapter for `provider`.
pub fn create_api(provider: ServiceProvider, access: &AccessConfig) -> Arc<dyn LlmApi> {
    let access = access.clone();
    match provider {
        ServiceProvider::OpenAI => Arc::new(OpenAiApi::new(access)),
        ServiceProvider::Alibaba => Arc::new(QwenApi::new(access)),
        ServiceProvider::Baidu => Arc::new(ErnieApi::new(access)),
        ServiceProvider::Tencent => Arc::new(HunyuanApi::new(access)),
        ServiceProvider::DeepSeek => Arc::new(DeepSeekApi::new(access)),
        ServiceProvider::Moonshot => Arc::new(MoonshotApi::new(access)),
        ServiceProvider::ChatGLM => Arc::new(ChatGlmApi::new(access)),
        ServiceProvider::SiliconFlow => Arc::new(SiliconFlowApi::new(access)),
        ServiceProvider::XAI => Arc::new(XaiApi::new(access)),
    }
}
