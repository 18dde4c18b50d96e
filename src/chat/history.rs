//! Bounded-context history assembly.

use tracing::debug;

use crate::chat::capability::Capabilities;
use crate::chat::normalize::{NormalizeOptions, normalize_content, strip_parts};
use crate::chat::session::Session;
use crate::chat::token;
use crate::config::{AppConfig, DEFAULT_SYSTEM_TEMPLATE, ModelConfig, fill_template_with, memory_prompt};
use crate::types::{ChatMessage, MessageContent, RequestMessage, Role};

/// Everything outside the session that shapes the outgoing history.
#[derive(Clone, Copy, Debug)]
pub struct HistoryContext<'a> {
    pub app: &'a AppConfig,
    pub extra_vision_models: &'a [String],
    /// System prompt describing the active tools, if any.
    pub tool_prompt: Option<&'a str>,
}

impl<'a> HistoryContext<'a> {
    pub fn new(app: &'a AppConfig) -> Self {
        Self {
            app,
            extra_vision_models: &[],
            tool_prompt: None,
        }
    }
}

/// Index of the oldest message that may be sent, before token budgeting.
pub fn context_start_index(session: &Session) -> usize {
    let config = &session.mask.model_config;
    let clear_context_index = session.clear_context_index.unwrap_or(0);
    let total = session.messages.len();
    let short_term_start = total.saturating_sub(config.history_message_count);
    let memory_start = if sends_long_term_memory(session) {
        session.last_summarize_index.min(short_term_start)
    } else {
        short_term_start
    };
    clear_context_index.max(memory_start).min(total)
}

fn sends_long_term_memory(session: &Session) -> bool {
    session.mask.model_config.send_memory
        && !session.memory_prompt.is_empty()
        && session.last_summarize_index > session.clear_context_index.unwrap_or(0)
}

fn system_prompts(config: &ModelConfig, ctx: &HistoryContext<'_>) -> Vec<RequestMessage> {
    let tool_prompt = ctx.tool_prompt.filter(|prompt| !prompt.is_empty());
    if ctx.app.should_inject_system_prompt(config) {
        let system_config = ModelConfig {
            template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
            ..config.clone()
        };
        let mut content = fill_template_with("", &system_config, &ctx.app.lang);
        if let Some(prompt) = tool_prompt {
            content.push_str(prompt);
        }
        vec![RequestMessage::new(Role::System, content)]
    } else if let Some(prompt) = tool_prompt {
        vec![RequestMessage::new(Role::System, prompt)]
    } else {
        Vec::new()
    }
}

/// Build the message list to send for `session`. Never mutates the session.
pub fn assemble(session: &Session, ctx: &HistoryContext<'_>) -> Vec<RequestMessage> {
    let config = &session.mask.model_config;
    let capabilities =
        Capabilities::for_model(config.provider_name, &config.model, ctx.extra_vision_models);

    let system = system_prompts(config, ctx);
    let long_term = if sends_long_term_memory(session) {
        vec![RequestMessage::new(
            Role::System,
            memory_prompt(&session.memory_prompt),
        )]
    } else {
        Vec::new()
    };

    let start = context_start_index(session);
    let budget = config.max_tokens as usize;
    let walk_options = NormalizeOptions {
        vision: capabilities.vision,
        files: true,
        accepts_parts: true,
    };

    let mut accepted: Vec<(RequestMessage, &ChatMessage)> = Vec::new();
    let mut used = 0usize;
    for message in session.messages[start..].iter().rev() {
        let content = normalize_content(message.role, &message.content, walk_options);
        let cost = token::estimate(&content);
        if used + cost > budget {
            break;
        }
        used += cost;
        accepted.push((RequestMessage::new(message.role, content), message));
    }
    accepted.reverse();

    debug!(
        session = %session.id,
        start,
        accepted = accepted.len(),
        tokens = used,
        "assembled history"
    );

    let mut outgoing: Vec<(RequestMessage, Option<&ChatMessage>)> = system
        .into_iter()
        .chain(long_term)
        .chain(session.mask.context.iter().map(ChatMessage::to_request))
        .map(|message| (message, None))
        .collect();
    outgoing.extend(
        accepted
            .into_iter()
            .map(|(message, source)| (message, Some(source))),
    );

    outgoing
        .into_iter()
        .map(|(mut message, source)| {
            let original: MessageContent = source
                .map(|source| source.content.clone())
                .unwrap_or_else(|| message.content.clone());
            if !capabilities.vision {
                message.content = strip_parts(&message.content, &original, |p| !p.is_image());
            }
            if !capabilities.files {
                message.content = strip_parts(&message.content, &original, |p| !p.is_file());
            }
            message
        })
        .collect()
}
