use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta, StreamProtocol};
use crate::ai::client::{ChatError, ChatResult};
use crate::config::{AccessConfig, ServiceProvider};
use crate::types::{RequestMessage, Role};

pub const BAIDU_BASE_URL: &str = "https://aip.baidubce.com";
pub const BAIDU_PROXY_PATH: &str = "/api/baidu";
pub const OAUTH_PATH: &str = "oauth/2.0/token";

/// Wenxin workshop endpoint for a model name.
pub fn chat_endpoint(model: &str) -> &str {
    match model {
        "ernie-4.0-8k" => "completions_pro",
        "ernie-4.0-8k-preview-0518" => "completions_adv_pro",
        "ernie-3.5-8k" => "completions",
        "ernie-speed-8k" => "ernie_speed",
        other => other,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BaiduMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BaiduPayload {
    pub messages: Vec<BaiduMessage>,
    pub stream: bool,
    pub model: String,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ErnieChunk {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

/// Ernie takes string content only, no system turns and an odd number of
/// messages alternating from the user.
pub fn repair_messages(messages: Vec<RequestMessage>) -> Vec<BaiduMessage> {
    let mut repaired: Vec<BaiduMessage> = messages
        .into_iter()
        .map(|message| BaiduMessage {
            role: match message.role {
                Role::Assistant => "assistant",
                Role::System | Role::User => "user",
            },
            content: message.content.text(),
        })
        .collect();
    while repaired.len() > 1 && repaired.len() % 2 == 0 {
        repaired.remove(0);
    }
    repaired
}

pub struct ErnieApi {
    endpoint: Endpoint,
}

impl ErnieApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::Baidu,
                BAIDU_BASE_URL,
                BAIDU_PROXY_PATH,
                access,
            ),
        }
    }

    fn client_credentials(&self) -> Option<(&str, &str)> {
        let access = &self.endpoint.access;
        if !access.direct {
            return None;
        }
        let provider = access.provider(ServiceProvider::Baidu)?;
        Some((provider.api_key.as_deref()?, provider.secret_key.as_deref()?))
    }
}

#[async_trait]
impl LlmApi for ErnieApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::Baidu
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn chat_path(&self, model: &str) -> String {
        format!(
            "rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{}",
            chat_endpoint(model)
        )
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let config = &request.config;
        let messages = self.endpoint.normalize(&request.messages, &config.model);
        ProviderPayload::Baidu(BaiduPayload {
            messages: repair_messages(messages),
            stream: request.stream,
            model: config.model.clone(),
            temperature: config.temperature,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            top_p: config.top_p,
        })
    }

    /// Direct calls authenticate through the access token, not a bearer key.
    fn headers(&self, _request: &ChatRequest) -> Vec<(&'static str, String)> {
        if self.client_credentials().is_some() {
            return Vec::new();
        }
        self.endpoint
            .api_key()
            .map(|key| vec![("Authorization", format!("Bearer {key}"))])
            .unwrap_or_default()
    }

    fn stream_protocol(&self) -> StreamProtocol {
        StreamProtocol::EventSource
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        let chunk: ErnieChunk = serde_json::from_str(data)?;
        if let Some(code) = chunk.error_code {
            return Ok(StreamDelta {
                error: Some(
                    chunk
                        .error_msg
                        .unwrap_or_else(|| format!("error code {code}")),
                ),
                ..StreamDelta::default()
            });
        }
        Ok(chunk
            .result
            .filter(|text| !text.is_empty())
            .map(StreamDelta::text)
            .unwrap_or_default())
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        response
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    async fn authorize_url(&self, http: &reqwest::Client, url: String) -> ChatResult<String> {
        let Some((client_id, client_secret)) = self.client_credentials() else {
            return Ok(url);
        };
        let token_url = format!("{}/{}", self.endpoint.base_url(), OAUTH_PATH);
        debug!(%token_url, "requesting baidu access token");
        let response = http
            .post(&token_url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "baidu token request failed");
            return Err(ChatError::status(status.as_u16(), &body));
        }
        let token: AccessToken = serde_json::from_str(&body)?;
        let separator = if url.contains('?') { '&' } else { '?' };
        Ok(format!("{url}{separator}access_token={}", token.access_token))
    }
}
