//! Runtime configuration: per-session model settings, provider credentials and
//! the prompt templates used by history assembly and summarization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::types::now_string;

pub const DEFAULT_INPUT_TEMPLATE: &str = "{{input}}";

pub const DEFAULT_SYSTEM_TEMPLATE: &str = r#"
You are ChatGPT, a large language model trained by {{ServiceProvider}}.
Knowledge cutoff: {{cutoff}}
Current model: {{model}}
Current time: {{time}}
Latex inline: \(x^2\)
Latex block: $$e=mc^2$$
"#;

pub const SUMMARIZE_PROMPT: &str =
    "Summarize the discussion briefly in 200 words or less to use as a prompt for future context.";

pub const TOPIC_PROMPT: &str = "Please generate a four to five word title summarizing our conversation without any lead-in, punctuation, quotation marks, periods, symbols, bold text, or additional text. Remove enclosing quotation marks.";

pub const DEFAULT_TOPIC: &str = "New Conversation";

pub const SUMMARIZE_MODEL: &str = "gpt-4o-mini";
pub const DEEPSEEK_SUMMARIZE_MODEL: &str = "deepseek-chat";

pub fn memory_prompt(summary: &str) -> String {
    format!("This is a summary of the chat history as a recap: {summary}")
}

fn knowledge_cutoff(model: &str) -> &'static str {
    match model {
        "gpt-4-turbo" | "gpt-4-turbo-2024-04-09" => "2023-12",
        "gpt-4o" | "gpt-4o-2024-05-13" | "gpt-4o-2024-08-06" | "gpt-4o-mini" => "2023-10",
        "o1" | "o1-mini" | "o3-mini" => "2023-10",
        "gpt-4.1" | "gpt-4.1-mini" | "gpt-4.1-nano" => "2024-06",
        "deepseek-chat" | "deepseek-reasoner" => "2024-07",
        _ => "2021-09",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceProvider {
    OpenAI,
    Alibaba,
    Baidu,
    Tencent,
    DeepSeek,
    Moonshot,
    ChatGLM,
    SiliconFlow,
    XAI,
}

impl ServiceProvider {
    pub const ALL: [ServiceProvider; 9] = [
        ServiceProvider::OpenAI,
        ServiceProvider::Alibaba,
        ServiceProvider::Baidu,
        ServiceProvider::Tencent,
        ServiceProvider::DeepSeek,
        ServiceProvider::Moonshot,
        ServiceProvider::ChatGLM,
        ServiceProvider::SiliconFlow,
        ServiceProvider::XAI,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceProvider::OpenAI => "OpenAI",
            ServiceProvider::Alibaba => "Alibaba",
            ServiceProvider::Baidu => "Baidu",
            ServiceProvider::Tencent => "Tencent",
            ServiceProvider::DeepSeek => "DeepSeek",
            ServiceProvider::Moonshot => "Moonshot",
            ServiceProvider::ChatGLM => "ChatGLM",
            ServiceProvider::SiliconFlow => "SiliconFlow",
            ServiceProvider::XAI => "XAI",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            ServiceProvider::OpenAI => "OPENAI",
            ServiceProvider::Alibaba => "ALIBABA",
            ServiceProvider::Baidu => "BAIDU",
            ServiceProvider::Tencent => "TENCENT",
            ServiceProvider::DeepSeek => "DEEPSEEK",
            ServiceProvider::Moonshot => "MOONSHOT",
            ServiceProvider::ChatGLM => "CHATGLM",
            ServiceProvider::SiliconFlow => "SILICONFLOW",
            ServiceProvider::XAI => "XAI",
        }
    }
}

impl fmt::Display for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ServiceProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ServiceProvider::ALL
            .into_iter()
            .find(|provider| provider.display_name().to_ascii_lowercase() == wanted)
            .or(match wanted.as_str() {
                "qwen" => Some(ServiceProvider::Alibaba),
                "ernie" => Some(ServiceProvider::Baidu),
                "hunyuan" => Some(ServiceProvider::Tencent),
                "glm" => Some(ServiceProvider::ChatGLM),
                "grok" => Some(ServiceProvider::XAI),
                _ => None,
            })
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// Per-session overridable model settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub model: String,
    pub provider_name: ServiceProvider,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(rename = "max_tokens")]
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub send_memory: bool,
    pub history_message_count: usize,
    pub compress_message_length_threshold: u32,
    pub enable_inject_system_prompts: bool,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress_provider_name: Option<ServiceProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            provider_name: ServiceProvider::OpenAI,
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 4000,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            send_memory: true,
            history_message_count: 4,
            compress_message_length_threshold: 1000,
            enable_inject_system_prompts: true,
            template: DEFAULT_INPUT_TEMPLATE.to_string(),
            compress_model: None,
            compress_provider_name: None,
            size: None,
        }
    }
}

/// Application-wide behaviour switches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub enable_auto_generate_title: bool,
    pub lang: String,
    /// Model-name prefixes that get the default system prompt injected.
    pub inject_model_prefixes: Vec<String>,
    pub model_config: ModelConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enable_auto_generate_title: true,
            lang: "en".to_string(),
            inject_model_prefixes: vec!["gpt-".to_string(), "chatgpt-".to_string()],
            model_config: ModelConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn should_inject_system_prompt(&self, config: &ModelConfig) -> bool {
        config.enable_inject_system_prompts
            && self
                .inject_model_prefixes
                .iter()
                .any(|prefix| config.model.starts_with(prefix.as_str()))
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProviderAccess {
    pub api_key: Option<String>,
    /// Baidu only: the secret half of the OAuth client credentials.
    pub secret_key: Option<String>,
    pub base_url: Option<String>,
}

/// Credentials and endpoint overrides, injected into every adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessConfig {
    pub use_custom_config: bool,
    /// Talk to the public provider endpoints instead of the same-origin proxy.
    pub direct: bool,
    pub proxy_origin: String,
    pub providers: HashMap<ServiceProvider, ProviderAccess>,
    pub extra_vision_models: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            use_custom_config: false,
            direct: true,
            proxy_origin: "http://localhost:3000".to_string(),
            providers: HashMap::new(),
            extra_vision_models: Vec::new(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AccessConfig {
    /// Build from process environment. Call `dotenvy::dotenv()` beforehand to pick up `.env`.
    pub fn from_env() -> Self {
        let mut config = AccessConfig::default();
        for provider in ServiceProvider::ALL {
            let prefix = provider.env_prefix();
            let access = ProviderAccess {
                api_key: env_non_empty(&format!("{prefix}_API_KEY")),
                secret_key: env_non_empty(&format!("{prefix}_SECRET_KEY")),
                base_url: env_non_empty(&format!("{prefix}_URL")),
            };
            if access.base_url.is_some() {
                config.use_custom_config = true;
            }
            if access != ProviderAccess::default() {
                config.providers.insert(provider, access);
            }
        }
        if let Some(direct) = env_flag("POLYCHAT_DIRECT") {
            config.direct = direct;
        }
        if let Some(origin) = env_non_empty("POLYCHAT_PROXY_ORIGIN") {
            config.proxy_origin = origin;
        }
        if let Some(models) = env_non_empty("VISION_MODELS") {
            config.extra_vision_models = models
                .split(',')
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .collect();
        }
        config
    }

    pub fn provider(&self, provider: ServiceProvider) -> Option<&ProviderAccess> {
        self.providers.get(&provider)
    }

    pub fn api_key(&self, provider: ServiceProvider) -> Option<&str> {
        self.provider(provider)
            .and_then(|access| access.api_key.as_deref())
    }

    /// Custom base URL, honoured only when custom config is enabled.
    pub fn custom_url(&self, provider: ServiceProvider) -> Option<&str> {
        if !self.use_custom_config {
            return None;
        }
        self.provider(provider)
            .and_then(|access| access.base_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn with_api_key(mut self, provider: ServiceProvider, key: impl Into<String>) -> Self {
        self.providers.entry(provider).or_default().api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, provider: ServiceProvider, url: impl Into<String>) -> Self {
        self.use_custom_config = true;
        self.providers.entry(provider).or_default().base_url = Some(url.into());
        self
    }
}

/// Expand `{{var}}` placeholders of the model's input template around `input`.
pub fn fill_template_with(input: &str, config: &ModelConfig, lang: &str) -> String {
    let mut output = if config.template.is_empty() {
        DEFAULT_INPUT_TEMPLATE.to_string()
    } else {
        config.template.clone()
    };

    if input.starts_with(output.as_str()) {
        output.clear();
    }

    let input_var = "{{input}}";
    if !output.contains(input_var) {
        output.push('\n');
        output.push_str(input_var);
    }

    let vars = [
        ("ServiceProvider", config.provider_name.display_name().to_string()),
        ("cutoff", knowledge_cutoff(&config.model).to_string()),
        ("model", config.model.clone()),
        ("time", now_string()),
        ("lang", lang.to_string()),
        ("input", input.to_string()),
    ];
    for (name, value) in vars {
        output = output.replace(&format!("{{{{{name}}}}}"), &value);
    }
    output
}

/// Model used for title/memory summarization of a session.
pub fn summarize_model(config: &ModelConfig) -> (String, ServiceProvider) {
    if let Some(model) = config.compress_model.as_ref().filter(|m| !m.is_empty()) {
        let provider = config.compress_provider_name.unwrap_or(config.provider_name);
        return (model.clone(), provider);
    }
    if config.model.starts_with("gpt") || config.model.starts_with("chatgpt") {
        return (SUMMARIZE_MODEL.to_string(), ServiceProvider::OpenAI);
    }
    if config.provider_name == ServiceProvider::DeepSeek || config.model.starts_with("deepseek-")
    {
        return (DEEPSEEK_SUMMARIZE_MODEL.to_string(), ServiceProvider::DeepSeek);
    }
    (config.model.clone(), config.provider_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_is_just_the_input() {
        let config = ModelConfig::default();
        assert_eq!(fill_template_with("hello", &config, "en"), "hello");
    }

    #[test]
    fn template_without_input_var_gets_it_appended() {
        let config = ModelConfig {
            template: "Model {{model}} says:".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(
            fill_template_with("hi", &config, "en"),
            "Model gpt-4o-mini says:\nhi"
        );
    }

    #[test]
    fn system_template_expands_provider_and_cutoff() {
        let config = ModelConfig {
            template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
            ..ModelConfig::default()
        };
        let filled = fill_template_with("", &config, "en");
        assert!(filled.contains("trained by OpenAI"));
        assert!(filled.contains("Knowledge cutoff: 2023-10"));
        assert!(!filled.contains("{{"));
    }

    #[test]
    fn injection_policy_uses_configured_prefixes() {
        let mut app = AppConfig::default();
        let mut config = ModelConfig::default();
        assert!(app.should_inject_system_prompt(&config));

        config.model = "qwen-max".to_string();
        assert!(!app.should_inject_system_prompt(&config));

        app.inject_model_prefixes.push("qwen-".to_string());
        assert!(app.should_inject_system_prompt(&config));

        config.enable_inject_system_prompts = false;
        assert!(!app.should_inject_system_prompt(&config));
    }

    #[test]
    fn summarize_model_prefers_compress_model() {
        let mut config = ModelConfig::default();
        assert_eq!(
            summarize_model(&config),
            (SUMMARIZE_MODEL.to_string(), ServiceProvider::OpenAI)
        );

        config.model = "deepseek-reasoner".to_string();
        config.provider_name = ServiceProvider::DeepSeek;
        assert_eq!(summarize_model(&config).0, DEEPSEEK_SUMMARIZE_MODEL);

        config.compress_model = Some("moonshot-v1-8k".to_string());
        config.compress_provider_name = Some(ServiceProvider::Moonshot);
        assert_eq!(
            summarize_model(&config),
            ("moonshot-v1-8k".to_string(), ServiceProvider::Moonshot)
        );
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("openai".parse(), Ok(ServiceProvider::OpenAI));
        assert_eq!("Qwen".parse(), Ok(ServiceProvider::Alibaba));
        assert!("nope".parse::<ServiceProvider>().is_err());
    }

    #[test]
    fn custom_url_requires_custom_config() {
        let mut access = AccessConfig::default().with_base_url(ServiceProvider::XAI, "x.test");
        assert_eq!(access.custom_url(ServiceProvider::XAI), Some("x.test"));
        access.use_custom_config = false;
        assert_eq!(access.custom_url(ServiceProvider::XAI), None);
    }
}
