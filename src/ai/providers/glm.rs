use serde::Serialize;
use serde_json::Value;

use super::{
    ChatCompletionsPayload, ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta,
    extract_chat_completion, parse_chat_completion_chunk,
};
use crate::config::{AccessConfig, ServiceProvider};

pub const CHATGLM_BASE_URL: &str = "https://open.bigmodel.cn";
pub const CHATGLM_PROXY_PATH: &str = "/api/chatglm";
pub const CHAT_PATH: &str = "api/paas/v4/chat/completions";
pub const IMAGE_PATH: &str = "api/paas/v4/images/generations";
pub const VIDEO_PATH: &str = "api/paas/v4/videos/generations";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Chat,
    Image,
    Video,
}

impl ModelKind {
    pub fn of(model: &str) -> Self {
        if model.starts_with("cogview-") {
            ModelKind::Image
        } else if model.starts_with("cogvideo-") {
            ModelKind::Video
        } else {
            ModelKind::Chat
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlmImagePayload {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlmVideoPayload {
    pub model: String,
    pub prompt: String,
}

pub struct ChatGlmApi {
    endpoint: Endpoint,
}

impl ChatGlmApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::ChatGLM,
                CHATGLM_BASE_URL,
                CHATGLM_PROXY_PATH,
                access,
            ),
        }
    }
}

fn media_url(response: &Value) -> Option<&str> {
    response.pointer("/data/0/url").and_then(Value::as_str)
}

impl LlmApi for ChatGlmApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::ChatGLM
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn chat_path(&self, model: &str) -> String {
        match ModelKind::of(model) {
            ModelKind::Chat => CHAT_PATH,
            ModelKind::Image => IMAGE_PATH,
            ModelKind::Video => VIDEO_PATH,
        }
        .to_string()
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let model = request.config.model.clone();
        let messages = self.endpoint.normalize(&request.messages, &model);
        // Generation models take the latest message as their prompt.
        let prompt = || {
            messages
                .last()
                .map(|message| message.content.text())
                .unwrap_or_default()
        };
        match ModelKind::of(&model) {
            ModelKind::Image => ProviderPayload::GlmImage(GlmImagePayload {
                prompt: prompt(),
                model,
                size: request.config.size.clone(),
            }),
            ModelKind::Video => ProviderPayload::GlmVideo(GlmVideoPayload {
                prompt: prompt(),
                model,
            }),
            ModelKind::Chat => {
                ProviderPayload::ChatCompletions(ChatCompletionsPayload::new(messages, request))
            }
        }
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        parse_chat_completion_chunk(data, false)
    }

    fn extract_message(&self, response: &Value, model: &str) -> String {
        match ModelKind::of(model) {
            ModelKind::Image => media_url(response)
                .map(|url| format!("![Generated Image]({url})"))
                .unwrap_or_default(),
            ModelKind::Video => media_url(response)
                .map(|url| format!("<video controls src=\"{url}\"></video>"))
                .unwrap_or_default(),
            ModelKind::Chat => extract_chat_completion(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::types::{RequestMessage, Role};
    use serde_json::json;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![
                RequestMessage::new(Role::User, "earlier"),
                RequestMessage::new(Role::User, "a red fox"),
            ],
            config: ModelConfig {
                model: model.to_string(),
                provider_name: ServiceProvider::ChatGLM,
                size: Some("1024x1024".into()),
                ..ModelConfig::default()
            },
            stream: true,
            tools: Vec::new(),
        }
    }

    #[test]
    fn image_models_use_generation_payload() {
        let api = ChatGlmApi::new(AccessConfig::default());
        let payload = api.build_payload(&request("cogview-3"));
        assert!(!payload.is_stream());
        assert_eq!(
            payload.to_body().unwrap(),
            json!({"model": "cogview-3", "prompt": "a red fox", "size": "1024x1024"})
        );
        assert_eq!(
            api.path(&api.chat_path("cogview-3")),
            "https://open.bigmodel.cn/api/paas/v4/images/generations"
        );
    }

    #[test]
    fn media_results_are_rendered() {
        let api = ChatGlmApi::new(AccessConfig::default());
        let body = json!({"data": [{"url": "https://cdn/x.png"}]});
        assert_eq!(
            api.extract_message(&body, "cogview-3"),
            "![Generated Image](https://cdn/x.png)"
        );
        assert_eq!(
            api.extract_message(&body, "cogvideo-x"),
            "<video controls src=\"https://cdn/x.png\"></video>"
        );
        assert_eq!(api.extract_message(&json!({}), "glm-4"), "");
    }

    #[test]
    fn chat_models_stream() {
        let api = ChatGlmApi::new(AccessConfig::default());
        assert!(api.build_payload(&request("glm-4-flash")).is_stream());
    }
}
