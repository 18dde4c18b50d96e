use serde_json::Value;

use super::{
    ChatCompletionsPayload, ChatRequest, Endpoint, LlmApi, ProviderPayload, StreamDelta,
    extract_chat_completion, parse_chat_completion_chunk,
};
use crate::config::{AccessConfig, ServiceProvider};
use crate::types::{RequestMessage, Role};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_PROXY_PATH: &str = "/api/deepseek";
pub const CHAT_PATH: &str = "chat/completions";

pub struct DeepSeekApi {
    endpoint: Endpoint,
}

impl DeepSeekApi {
    pub fn new(access: AccessConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                ServiceProvider::DeepSeek,
                DEEPSEEK_BASE_URL,
                DEEPSEEK_PROXY_PATH,
                access,
            ),
        }
    }
}

/// DeepSeek rejects conversations whose first non-system turn is not the user's.
pub fn drop_leading_non_user(messages: Vec<RequestMessage>) -> Vec<RequestMessage> {
    let mut seen_user = false;
    messages
        .into_iter()
        .filter(|message| {
            if message.role == Role::User {
                seen_user = true;
            }
            seen_user || message.role == Role::System
        })
        .collect()
}

impl LlmApi for DeepSeekApi {
    fn provider(&self) -> ServiceProvider {
        ServiceProvider::DeepSeek
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
        ProviderPayload::ChatCompletions(ChatCompletionsPayload::new(
            drop_leading_non_user(messages),
            request,
        ))
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
    use crate::types::{ContentPart, MessageContent};

    #[test]
    fn leading_assistant_turns_are_dropped() {
        let request = ChatRequest {
            messages: vec![
                RequestMessage::new(Role::System, "be brief"),
                RequestMessage::new(Role::Assistant, "hello there"),
                RequestMessage::new(Role::User, "hi"),
                RequestMessage::new(Role::Assistant, "> thinking\n\nyo"),
            ],
            config: ModelConfig {
                model: "deepseek-chat".into(),
                ..ModelConfig::default()
            },
            stream: true,
            tools: Vec::new(),
        };
        let api = DeepSeekApi::new(AccessConfig::default());
        let ProviderPayload::ChatCompletions(payload) = api.build_payload(&request) else {
            panic!("expected chat completions payload");
        };
        let roles: Vec<&str> = payload.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(
            payload.messages[2].content,
            Some(MessageContent::Text("yo".into()))
        );
        assert_eq!(api.path(&api.chat_path("deepseek-chat")), "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn content_is_forced_to_strings() {
        let request = ChatRequest {
            messages: vec![RequestMessage::new(
                Role::User,
                vec![ContentPart::text("a"), ContentPart::image("x")],
            )],
            config: ModelConfig {
                model: "deepseek-vl2".into(),
                ..ModelConfig::default()
            },
            ..ChatRequest::default()
        };
        let api = DeepSeekApi::new(AccessConfig::default());
        let ProviderPayload::ChatCompletions(payload) = api.build_payload(&request) else {
            panic!("expected chat completions payload");
        };
        assert_eq!(payload.messages[0].content, Some(MessageContent::Text("a".into())));
    }

    #[test]
    fn reasoning_deltas_are_parsed() {
        let api = DeepSeekApi::new(AccessConfig::default());
        let delta = api
            .parse_stream_data(r#"{"choices":[{"delta":{"content":null,"reasoning_content":"step"}}]}"#)
            .unwrap();
        assert_eq!(delta.reasoning.as_deref(), Some("step"));
        assert_eq!(delta.content, None);
    }
}
