use serde_json::Value;

use super::{
    ChatCompletionsPayload, ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta,
    extract_chat_completion, parse_chat_completion_chunk,
};
use crate::config::{AccessConfig, ServiceProvider};

pub const SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn";
pub const SILICONFLOW_PROXY_PATH: &str = "/api/siliconflow";
pub const CHAT_PATH: &str = "v1/chat/completions";

pub struct SiliconFlowApi {
    endpoint: Endpoint,
}

impl SiliconFlowApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::SiliconFlow,
                SILICONFLOW_BASE_URL,
                SILICONFLOW_PROXY_PATH,
                access,
            ),
        }
    }
}

impl LlmApi for SiliconFlowApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::SiliconFlow
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn chat_path(&self, _model: &str) -> String {
        CHAT_PATH.to_string()
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let messages = self
            .endpoint
            .normalize(&request.messages, &request.config.model);
        ProviderPayload::ChatCompletions(ChatCompletionsPayload::new(messages, request))
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        parse_chat_completion_chunk(data, true)
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        extract_chat_completion(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::types::{ContentPart, MessageContent, RequestMessage, Role};

    #[test]
    fn vision_models_keep_image_parts() {
        let api = SiliconFlowApi::new(AccessConfig::default());
        let request = ChatRequest {
            messages: vec![RequestMessage::new(
                Role::User,
                vec![ContentPart::text("what is this"), ContentPart::image("data:x")],
            )],
            config: ModelConfig {
                model: "Qwen/Qwen2-VL-72B-Instruct".into(),
                provider_name: ServiceProvider::SiliconFlow,
                ..ModelConfig::default()
            },
            stream: false,
            tools: Vec::new(),
        };
        let ProviderPayload::ChatCompletions(payload) = api.build_payload(&request) else {
            panic!("expected chat completions payload");
        };
        assert!(matches!(
            payload.messages[0].content,
            Some(MessageContent::Parts(ref parts)) if parts.len() == 2
        ));
        assert_eq!(
            api.path(&api.chat_path("x")),
            "https://api.siliconflow.cn/v1/chat/completions"
        );
    }
}
