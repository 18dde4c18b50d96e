//! Model capability lookup: vision input, file input and request timeouts.

use std::time::Duration;

use crate::config::ServiceProvider;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT_THINKING: Duration = Duration::from_secs(300);

const VISION_KEYWORDS: &[&str] = &[
    "vision",
    "gpt-4o",
    "gpt-4.1",
    "claude-3",
    "gemini-1.5",
    "gemini-exp",
    "gemini-2.0",
    "learnlm",
    "qwen-vl",
    "qwen2-vl",
    "glm-4v",
    "vl",
    "o3",
    "o4-mini",
];

const EXCLUDED_VISION_MODELS: &[&str] = &["claude-3-5-haiku-20241022"];

/// Capability flags resolved for a single model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub vision: bool,
    pub files: bool,
}

impl Capabilities {
    pub fn for_model(
        provider: ServiceProvider,
        model: &str,
        extra_vision_models: &[String],
    ) -> Self {
        Self {
            vision: is_vision_model(model, extra_vision_models),
            files: supports_files(provider, model),
        }
    }
}

pub fn is_vision_model(model: &str, extra_vision_models: &[String]) -> bool {
    if extra_vision_models.iter().any(|m| m == model) {
        return true;
    }
    let lower = model.to_ascii_lowercase();
    if EXCLUDED_VISION_MODELS.contains(&lower.as_str()) {
        return false;
    }
    if VISION_KEYWORDS.iter().any(|keyword| lower.contains(keyword)) {
        return true;
    }
    if let Some(pos) = lower.find("gpt-4-turbo")
        && !lower[pos..].contains("preview")
    {
        return true;
    }
    lower == "dall-e-3"
}

/// Whether the model accepts structured file parts. Only the OpenAI
/// endpoint carries them through.
pub fn supports_files(provider: ServiceProvider, model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    provider == ServiceProvider::OpenAI && (lower.contains("gpt-4") || lower.contains("claude-3"))
}

/// Request timeout, measured until response headers arrive.
pub fn request_timeout(model: &str) -> Duration {
    let lower = model.to_ascii_lowercase();
    let slow = ["dall-e", "dalle", "o1", "o3"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
        || lower.contains("deepseek-r")
        || lower.contains("-thinking");
    if slow {
        REQUEST_TIMEOUT_THINKING
    } else {
        REQUEST_TIMEOUT
    }
}

/// Whether the provider's chat endpoint accepts array-shaped content.
pub fn accepts_content_parts(provider: ServiceProvider) -> bool {
    !matches!(
        provider,
        ServiceProvider::Baidu | ServiceProvider::DeepSeek | ServiceProvider::Moonshot
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_detection() {
        let none: Vec<String> = Vec::new();
        assert!(is_vision_model("gpt-4o-mini", &none));
        assert!(is_vision_model("qwen-vl-max", &none));
        assert!(is_vision_model("gpt-4-turbo", &none));
        assert!(!is_vision_model("gpt-4-turbo-preview", &none));
        assert!(is_vision_model("dall-e-3", &none));
        assert!(!is_vision_model("claude-3-5-haiku-20241022", &none));
        assert!(!is_vision_model("deepseek-chat", &none));
        assert!(is_vision_model("my-model", &["my-model".to_string()]));
    }

    #[test]
    fn thinking_models_get_longer_timeouts() {
        assert_eq!(request_timeout("gpt-4o"), REQUEST_TIMEOUT);
        assert_eq!(request_timeout("o1-mini"), REQUEST_TIMEOUT_THINKING);
        assert_eq!(request_timeout("deepseek-reasoner"), REQUEST_TIMEOUT_THINKING);
        assert_eq!(
            request_timeout("gemini-2.0-flash-thinking-exp"),
            REQUEST_TIMEOUT_THINKING
        );
    }

    #[test]
    fn file_support_by_family() {
        assert!(supports_files(ServiceProvider::OpenAI, "gpt-4o"));
        assert!(supports_files(ServiceProvider::OpenAI, "claude-3-opus"));
        assert!(!supports_files(ServiceProvider::Alibaba, "qwen-max"));
        assert!(!supports_files(ServiceProvider::SiliconFlow, "gpt-4o"));
    }
}
