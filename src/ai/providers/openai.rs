use serde_json::Value;

use super::{
    ChatCompletionsPayload, ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta,
    extract_chat_completion, parse_chat_completion_chunk,
};
use crate::chat::capability;
use crate::config::{AccessConfig, ServiceProvider};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const OPENAI_PROXY_PATH: &str = "/api/openai";
pub const CHAT_PATH: &str = "v1/chat/completions";

pub struct OpenAiApi {
    endpoint: Endpoint,
}

impl OpenAiApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::OpenAI,
                OPENAI_BASE_URL,
                OPENAI_PROXY_PATH,
                access,
            ),
        }
    }
}

fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

impl LlmApi for OpenAiApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::OpenAI
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn chat_path(&self, _model: &str) -> String {
        CHAT_PATH.to_string()
    }

    fn build_payload(&self, request: &ChatRequest) -> ProviderPayload {
        let model = &request.config.model;
        let messages = self.endpoint.normalize(&request.messages, model);
        let mut payload = ChatCompletionsPayload::new(messages, request);

        if is_reasoning_model(model) {
            payload.temperature = 1.0;
            payload.top_p = 1.0;
            payload.presence_penalty = 0.0;
            payload.frequency_penalty = 0.0;
        }
        if capability::is_vision_model(model, &self.endpoint.access.extra_vision_models) {
            payload.max_tokens = Some(request.config.max_tokens.max(4000));
        }
        ProviderPayload::ChatCompletions(payload)
    }

    fn parse_stream_data(&self, data: &str) -> Result<StreamDelta, serde_json::Error> {
        parse_chat_completion_chunk(data, true)
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        extract_chat_completion(response)
    }
}
