use serde_json::Value;

use super::{
    ChatCompletionsPayload, ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta,
    extract_chat_completion, parse_chat_completion_chunk,
};
use crate::config::{AccessConfig, ServiceProvider};

pub const MOONSHOT_BASE_URL: &str = "https://api.moonshot.cn";
pub const MOONSHOT_PROXY_PATH: &str = "/api/moonshot";
pub const CHAT_PATH: &str = "v1/chat/completions";

pub struct MoonshotApi {
    endpoint: Endpoint,
}

impl MoonshotApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::Moonshot,
                MOONSHOT_BASE_URL,
                MOONSHOT_PROXY_PATH,
                access,
            ),
        }
    }
}

impl LlmApi for MoonshotApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::Moonshot
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
        parse_chat_completion_chunk(data, false)
    }

    fn extract_message(&self, response: &Value, _model: &str) -> String {
        extract_chat_completion(response)
    }
}
