use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta, WireMessage, WireTool, wire,
};
use crate::config::{AccessConfig, ServiceProvider};
use crate::types::{ContentPart, MessageContent};

pub const ALIBABA_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/";
pub const ALIBABA_PROXY_PATH: &str = "/api/alibaba";
pub const TEXT_PATH: &str = "v1/services/aigc/text-generation/generation";
pub const MULTIMODAL_PATH: &str = "v1/services/aigc/multimodal-generation/generation";

/// DashScope content item: `{text}` or `{image}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlibabaPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AlibabaContent {
    Text(String),
    Parts(Vec<AlibabaPart>),
}

impl From<String> for AlibabaContent {
    fn from(value: String) -> Self {
        AlibabaContent::Text(value)
    }
}

impl From<MessageContent> for AlibabaContent {
    fn from(content: MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => AlibabaContent::Text(text),
            MessageContent::Parts(parts) => AlibabaContent::Parts(
                parts
                    .into_iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(AlibabaPart {
                            text: Some(text),
                            image: None,
                        }),
                        ContentPart::ImageUrl { image_url } => Some(AlibabaPart {
                            text: None,
                            image: Some(image_url.url),
                        }),
                        ContentPart::FileUrl { .. } => None,
                    })
                    .collect(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlibabaInput {
    pub messages: Vec<WireMessage<AlibabaContent>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlibabaParameters {
    pub result_format: &'static str,
    pub incremental_output: bool,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlibabaPayload {
    pub model: String,
    pub input: AlibabaInput,
    pub parameters: AlibabaParameters,
}

#[derive(Debug, Deserialize)]
struct DashScopeChunk {
    #[serde(default)]
    output: Option<DashScopeOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    choices: Vec<wire::ChunkChoice>,
}

pub struct QwenApi {
    endpoint: Endpoint,
}

impl QwenApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::Alibaba,
                ALIBABA_BASE_URL,
                ALIBABA_PROXY_PATH,
                access,
            ),
        }
    }
}

impl LlmApi for QwenApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::Alibaba
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn chat_path(&self, model: &str) -> String {
        if model.contains("vl") || model.contains("omni") {
            MULTIMODAL_PATH
        } else {
            TEXT_PATH
        }
        .to_string()
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let config = &request.config;
        let messages = self
            .endpoint
            .normalize(&request.messages, &config.model)
            .into_iter()
            .map(|m| WireMessage::new(m.role.as_str(), AlibabaContent::from(m.content)))
            .collect();
        // DashScope requires top_p strictly below 1.
        let top_p = if config.top_p >= 1.0 { 0.99 } else { config.top_p };
        ProviderPayload::Alibaba(AlibabaPayload {
            model: config.model.clone(),
            input: AlibabaInput { messages },
            parameters: AlibabaParameters {
                result_format: "message",
                incremental_output: request.stream,
                temperature: config.temperature,
                top_p,
                tools: request.tools.iter().map(WireTool::from).collect(),
            },
        })
    }

    fn headers(&self, request: &ChatRequest) -> Vec<(&'static str, String)> {
        let mut headers = vec![(
            "X-DashScope-SSE",
            if request.stream { "enable" } else { "disable" }.to_string(),
        )];
        if let Some(key) = self.endpoint.api_key() {
            headers.push(("Authorization", format!("Bearer {key}")));
        }
        headers
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        let chunk: DashScopeChunk = serde_json::from_str(data)?;
        if let (Some(code), None) = (chunk.code.as_ref(), chunk.output.as_ref()) {
            return Ok(StreamDelta {
                error: Some(chunk.message.unwrap_or_else(|| code.clone())),
                ..StreamDelta::default()
            });
        }
        Ok(chunk
            .output
            .and_then(|output| output.choices.into_iter().next())
            .and_then(|choice| choice.message.or(choice.delta))
            .map(|message| message.into_stream_delta(true))
            .unwrap_or_default())
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        response
            .pointer("/output/choices/0/message/content")
            .and_then(wire::content_text)
            .unwrap_or_default()
    }
}
