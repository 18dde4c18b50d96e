use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta, StreamProtocol, WireMessage};
use crate::config::{AccessConfig, ServiceProvider};
use crate::types::{MessageContent, Role};

pub const TENCENT_BASE_URL: &str = "https://hunyuan.tencentcloudapi.com";
pub const TENCENT_PROXY_PATH: &str = "/api/tencent";

/// Serialized with snake_case keys; `ProviderPayload::to_body` capitalizes them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TencentPayload {
    pub model: String,
    pub messages: Vec<WireMessage<MessageContent>>,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HunyuanChunk {
    #[serde(default)]
    choices: Vec<HunyuanChoice>,
    #[serde(default)]
    error: Option<HunyuanError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HunyuanChoice {
    #[serde(default)]
    delta: Option<HunyuanDelta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HunyuanDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HunyuanError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HunyuanApi {
    endpoint: Endpoint,
}

impl HunyuanApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::Tencent,
                TENCENT_BASE_URL,
                TENCENT_PROXY_PATH,
                access,
            ),
        }
    }
}

impl LlmApi for HunyuanApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::Tencent
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Hunyuan exposes a single action endpoint; the suffix is ignored.
    fn path(&self, _suffix: &str) -> String {
        self.endpoint.base_url()
    }

    fn chat_path(&self, _model: &str) -> String {
        String::new()
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let config = &request.config;
        let messages = self
            .endpoint
            .normalize(&request.messages, &config.model)
            .into_iter()
            .enumerate()
            .map(|(index, message)| {
                // System turns are only accepted at the head of the list.
                let role = match message.role {
                    Role::System if index != 0 => Role::User,
                    role => role,
                };
                WireMessage::new(role.as_str(), message.content)
            })
            .collect();
        ProviderPayload::Tencent(TencentPayload {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            stream: request.stream,
        })
    }

    fn stream_protocol(&self) -> StreamProtocol {
        StreamProtocol::EventSource
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        let chunk: HunyuanChunk = serde_json::from_str(data)?;
        if let Some(error) = chunk.error {
            return Ok(StreamDelta {
                error: error.message.or(error.code),
                ..StreamDelta::default()
            });
        }
        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamDelta::text)
            .unwrap_or_default())
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        response
            .pointer("/Choices/0/Message/Content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}
