//! Session store: conversations, stream event application and summarization.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::client::{ChatClient, ChatError, ChatResult};
use crate::ai::providers::ChatRequest;
use crate::ai::stream::{ChatCompletion, ChatEvent};
use crate::chat::history::{self, HistoryContext};
use crate::chat::{capability, controller, token};
use crate::config::{
    AppConfig, DEFAULT_TOPIC, ModelConfig, SUMMARIZE_PROMPT, TOPIC_PROMPT, fill_template_with,
    memory_prompt, summarize_model,
};
use crate::storage::{SessionStorage, StorageError};
use crate::tools::{ToolError, ToolRegistry};
use crate::types::{
    ChatMessage, ContentPart, MessageContent, RequestMessage, Role, UploadFile, now_string,
};

/// Minimum history size, in tokens, before a title is generated.
pub const SUMMARIZE_MIN_LEN: usize = 50;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStat {
    pub token_count: usize,
    pub word_count: usize,
    pub char_count: usize,
}

/// Persona and model settings attached to a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mask {
    pub name: String,
    /// Fixed messages sent ahead of the conversation.
    #[serde(default)]
    pub context: Vec<ChatMessage>,
    pub model_config: ModelConfig,
    /// Names of the tools enabled for this mask.
    #[serde(default)]
    pub plugin: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub topic: String,
    pub memory_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub stat: ChatStat,
    /// Unix time in milliseconds.
    pub last_update: i64,
    pub last_summarize_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_context_index: Option<usize>,
    pub mask: Mask,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            memory_prompt: String::new(),
            messages: Vec::new(),
            stat: ChatStat::default(),
            last_update: now_millis(),
            last_summarize_index: 0,
            clear_context_index: None,
            mask: Mask::default(),
        }
    }
}

impl Session {
    pub fn new(model_config: ModelConfig) -> Self {
        Self {
            mask: Mask {
                model_config,
                ..Mask::default()
            },
            ..Self::default()
        }
    }

    /// Session for `mask`, named after it.
    pub fn with_mask(mask: Mask) -> Self {
        Self {
            topic: if mask.name.is_empty() {
                DEFAULT_TOPIC.to_string()
            } else {
                mask.name.clone()
            },
            mask,
            ..Self::default()
        }
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn touch(&mut self) {
        self.last_update = now_millis();
    }
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Token estimate for a run of messages.
pub fn count_messages<'a>(messages: impl IntoIterator<Item = &'a ChatMessage>) -> usize {
    messages
        .into_iter()
        .map(|message| token::estimate(&message.content))
        .sum()
}

/// Strip enclosing quotes/asterisks and trailing punctuation from a generated title.
pub fn trim_topic(topic: &str) -> String {
    const ENCLOSING: &[char] = &['"', '“', '”', '*'];
    const TRAILING: &[char] = &[
        '，', '。', '！', '？', '”', '“', '"', '、', ',', '.', '!', '?', '*',
    ];
    topic
        .trim()
        .trim_matches(ENCLOSING)
        .trim_end_matches(TRAILING)
        .to_string()
}

/// Text, images and files typed or attached by the user.
#[derive(Clone, Debug, Default)]
pub struct UserInput {
    pub text: String,
    /// Image URLs or data URLs.
    pub images: Vec<String>,
    pub files: Vec<UploadFile>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Renders thinking deltas into the message body as `> ` blockquote lines.
#[derive(Clone, Debug, Default)]
pub struct ThinkingRenderer {
    text: String,
    thinking: bool,
}

impl ThinkingRenderer {
    pub fn push(&mut self, chunk: &str, is_thinking: bool) {
        if is_thinking {
            if !self.thinking {
                if !self.text.is_empty() {
                    self.text.push('\n');
                }
                self.text.push_str("> ");
                self.text.push_str(chunk);
            } else {
                self.text.push_str(&chunk.replace("\n\n", "\n\n> "));
            }
        } else {
            if self.thinking {
                self.text.push_str("\n\n");
            }
            self.text.push_str(chunk);
        }
        self.thinking = is_thinking;
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// An assistant reply being streamed into a session.
#[derive(Debug)]
pub struct PendingReply {
    pub session_id: String,
    pub user_message_id: String,
    pub bot_message_id: String,
    pub request: ChatRequest,
    /// Tools enabled on the session's mask.
    pub plugins: Vec<String>,
    renderer: ThinkingRenderer,
}

impl PendingReply {
    /// Advertise the mask's enabled tools on the outgoing request.
    pub async fn attach_tools(&mut self, registry: &ToolRegistry) -> Result<(), ToolError> {
        self.request.tools = registry.specs_for(&self.plugins).await?;
        Ok(())
    }
}

/// What a summarization pass changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub topic_updated: bool,
    pub memory_updated: bool,
}

pub struct SessionStore {
    sessions: Vec<Session>,
    current: usize,
    app: AppConfig,
    extra_vision_models: Vec<String>,
    storage: Option<Arc<dyn SessionStorage>>,
}

impl SessionStore {
    pub fn new(app: AppConfig) -> Self {
        let session = Session::new(app.model_config.clone());
        Self {
            sessions: vec![session],
            current: 0,
            app,
            extra_vision_models: Vec::new(),
            storage: None,
        }
    }

    /// Store backed by `storage`, loading every saved session.
    pub fn with_storage(
        app: AppConfig,
        storage: Arc<dyn SessionStorage>,
    ) -> Result<Self, StorageError> {
        let mut store = Self::new(app);
        let saved = storage.load_all()?;
        if !saved.is_empty() {
            info!(sessions = saved.len(), "loaded saved sessions");
            store.sessions = saved;
        }
        store.storage = Some(storage);
        Ok(store)
    }

    pub fn with_extra_vision_models(mut self, models: Vec<String>) -> Self {
        self.extra_vision_models = models;
        self
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn current_index(&self) -> usize {
        self.current.min(self.sessions.len().saturating_sub(1))
    }

    pub fn current_session(&self) -> &Session {
        &self.sessions[self.current_index()]
    }

    pub fn current_session_mut(&mut self) -> &mut Session {
        let index = self.current_index();
        &mut self.sessions[index]
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Open a new session at the top of the list and select it.
    pub fn new_session(&mut self, mask: Option<Mask>) -> &Session {
        let session = match mask {
            Some(mask) => Session::with_mask(mask),
            None => Session::new(self.app.model_config.clone()),
        };
        self.sessions.insert(0, session);
        self.current = 0;
        self.persist_index(0);
        &self.sessions[0]
    }

    /// Copy of the current session with fresh message ids.
    pub fn fork_session(&mut self) -> &Session {
        let source = self.current_session();
        let mut fork = Session {
            topic: source.topic.clone(),
            mask: source.mask.clone(),
            ..Session::default()
        };
        fork.messages = source
            .messages
            .iter()
            .map(|message| ChatMessage {
                id: uuid::Uuid::new_v4().to_string(),
                ..message.clone()
            })
            .collect();
        self.sessions.insert(0, fork);
        self.current = 0;
        self.persist_index(0);
        &self.sessions[0]
    }

    pub fn select_session(&mut self, index: usize) {
        self.current = index.min(self.sessions.len().saturating_sub(1));
    }

    /// Move the selection by `delta`, wrapping around.
    pub fn next_session(&mut self, delta: isize) {
        let n = self.sessions.len() as isize;
        let next = (self.current_index() as isize + delta).rem_euclid(n);
        self.select_session(next as usize);
    }

    /// Remove the session at `index`. The list never becomes empty.
    pub fn delete_session(&mut self, index: usize) -> Option<Session> {
        if index >= self.sessions.len() {
            return None;
        }
        let current = self.current_index();
        let deleted = self.sessions.remove(index);
        if self.sessions.is_empty() {
            self.sessions
                .push(Session::new(self.app.model_config.clone()));
            self.current = 0;
            self.persist_index(0);
        } else {
            let shifted = current - usize::from(index < current);
            self.current = shifted.min(self.sessions.len() - 1);
        }
        if let Some(storage) = &self.storage
            && let Err(err) = storage.delete(&deleted.id)
        {
            warn!(session = %deleted.id, error = %err, "could not delete saved session");
        }
        Some(deleted)
    }

    pub fn clear_sessions(&mut self) {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.id.clone()).collect();
        if let Some(storage) = &self.storage {
            for id in &ids {
                if let Err(err) = storage.delete(id) {
                    warn!(session = %id, error = %err, "could not delete saved session");
                }
            }
        }
        self.sessions = vec![Session::new(self.app.model_config.clone())];
        self.current = 0;
        self.persist_index(0);
    }

    /// Drop all messages and the memory of `session_id`.
    pub fn reset_session(&mut self, session_id: &str) {
        if let Some(session) = self.session_mut(session_id) {
            session.messages.clear();
            session.memory_prompt.clear();
            session.last_summarize_index = 0;
            session.clear_context_index = None;
            session.touch();
        }
        self.persist(session_id);
    }

    /// Nothing before the current end of the conversation is sent again.
    pub fn clear_context(&mut self, session_id: &str) {
        if let Some(session) = self.session_mut(session_id) {
            session.clear_context_index = Some(session.messages.len());
            session.touch();
        }
        self.persist(session_id);
    }

    /// Append the user's message and a streaming placeholder to the current
    /// session and build the request for the reply.
    pub fn on_user_input(
        &mut self,
        input: UserInput,
        tool_prompt: Option<&str>,
    ) -> ChatResult<PendingReply> {
        let index = self.current_index();
        let session = &self.sessions[index];
        let config = session.mask.model_config.clone();

        let mut parts = Vec::new();
        if !input.text.is_empty() {
            parts.push(ContentPart::text(fill_template_with(
                &input.text,
                &config,
                &self.app.lang,
            )));
        }
        if !input.images.is_empty() {
            if capability::is_vision_model(&config.model, &self.extra_vision_models) {
                parts.extend(input.images.into_iter().map(ContentPart::image));
            } else {
                warn!(model = %config.model, "model does not accept images, skipping them");
                parts.push(ContentPart::text(format!(
                    "[{} image(s) were uploaded but ignored as the current model doesn't support images]",
                    input.images.len()
                )));
            }
        }
        parts.extend(input.files.into_iter().map(ContentPart::file));
        if parts.is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let content = match parts.as_slice() {
            [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(parts),
        };
        let user = ChatMessage::user(content);
        let mut bot = ChatMessage::assistant("");
        bot.streaming = true;
        bot.model = Some(config.model.clone());

        let ctx = HistoryContext {
            app: &self.app,
            extra_vision_models: &self.extra_vision_models,
            tool_prompt,
        };
        let mut messages = history::assemble(session, &ctx);
        messages.push(user.to_request());

        let reply = PendingReply {
            session_id: session.id.clone(),
            user_message_id: user.id.clone(),
            bot_message_id: bot.id.clone(),
            request: ChatRequest {
                messages,
                config,
                stream: true,
                tools: Vec::new(),
            },
            plugins: session.mask.plugin.clone(),
            renderer: ThinkingRenderer::default(),
        };

        let session = &mut self.sessions[index];
        session.messages.push(user);
        session.messages.push(bot);
        session.touch();
        debug!(session = %reply.session_id, sent = reply.request.messages.len(), "user input queued");
        Ok(reply)
    }

    /// Fold one stream event into the reply's messages. Returns true for
    /// the terminal event.
    pub fn apply_event(&mut self, reply: &mut PendingReply, event: &ChatEvent) -> bool {
        let Some(session) = self.session_mut(&reply.session_id) else {
            warn!(session = %reply.session_id, "reply for a missing session");
            return event.is_terminal();
        };

        match event {
            ChatEvent::TextDelta(text) | ChatEvent::ThinkingDelta(text) => {
                let thinking = matches!(event, ChatEvent::ThinkingDelta(_));
                reply.renderer.push(text, thinking);
                if let Some(bot) = session.message_mut(&reply.bot_message_id) {
                    bot.streaming = true;
                    bot.content = MessageContent::Text(reply.renderer.text().to_string());
                }
                false
            }
            ChatEvent::ToolCallDelta(_) => false,
            ChatEvent::ToolStarted(tool) => {
                if let Some(bot) = session.message_mut(&reply.bot_message_id) {
                    bot.tools.push(tool.clone());
                }
                false
            }
            ChatEvent::ToolFinished(tool) => {
                if let Some(slot) = session
                    .message_mut(&reply.bot_message_id)
                    .and_then(|bot| bot.tools.iter_mut().find(|t| t.id == tool.id))
                {
                    *slot = tool.clone();
                }
                false
            }
            ChatEvent::Done(completion) => {
                let mut finished = None;
                if let Some(bot) = session.message_mut(&reply.bot_message_id) {
                    bot.streaming = false;
                    let rendered = reply.renderer.text();
                    let content = if rendered.is_empty() {
                        completion.content.as_str()
                    } else {
                        rendered
                    };
                    if !content.is_empty() {
                        bot.content = MessageContent::Text(content.to_string());
                        bot.date = now_string();
                        finished = Some(bot.clone());
                    }
                }
                session.touch();
                if let Some(message) = finished {
                    self.update_stat(&reply.session_id, &message);
                }
                self.finish(reply);
                true
            }
            ChatEvent::Failed(err) => {
                let diagnostic = serde_json::to_string_pretty(&json!({
                    "error": true,
                    "message": err.to_string(),
                }))
                .unwrap_or_else(|_| err.to_string());
                if let Some(bot) = session.message_mut(&reply.bot_message_id) {
                    let mut text = bot.content.text();
                    text.push_str("\n\n");
                    text.push_str(&diagnostic);
                    bot.content = MessageContent::Text(text);
                    bot.streaming = false;
                    bot.is_error = true;
                }
                if let Some(user) = session.message_mut(&reply.user_message_id) {
                    user.is_error = true;
                }
                session.touch();
                self.finish(reply);
                true
            }
        }
    }

    fn finish(&mut self, reply: &PendingReply) {
        controller::remove(&reply.session_id, &reply.bot_message_id);
        self.persist(&reply.session_id);
    }

    /// Add `message`'s size to the session statistics.
    pub fn update_stat(&mut self, session_id: &str, message: &ChatMessage) {
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        let text = message.content.text();
        session.stat.char_count += text.chars().count();
        session.stat.word_count += text.split_whitespace().count();
        session.stat.token_count += token::estimate(&message.content);
    }

    /// Stream `reply` to completion, applying every event to the session,
    /// then summarize. `observe` sees each event before it is applied.
    pub async fn drive_reply<F>(
        &mut self,
        client: &ChatClient,
        mut reply: PendingReply,
        mut observe: F,
    ) -> ChatResult<ChatCompletion>
    where
        F: FnMut(&ChatEvent),
    {
        let mut stream = client.chat(reply.request.clone());
        controller::add(
            &reply.session_id,
            &reply.bot_message_id,
            stream.cancellation_token(),
        );

        let mut outcome = None;
        while let Some(event) = stream.next().await {
            observe(&event);
            self.apply_event(&mut reply, &event);
            match event {
                ChatEvent::Done(completion) => outcome = Some(Ok(completion)),
                ChatEvent::Failed(err) => outcome = Some(Err(err)),
                _ => {}
            }
        }
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let event = ChatEvent::Failed(ChatError::EmptyResponse);
                self.apply_event(&mut reply, &event);
                Err(ChatError::EmptyResponse)
            }
        };

        if matches!(&outcome, Ok(completion) if !completion.aborted) {
            self.summarize(&reply.session_id, client, false).await;
        }
        outcome
    }

    /// Generate a title and compress older history into the memory prompt
    /// when the session qualifies. Failures are logged, never raised.
    pub async fn summarize(
        &mut self,
        session_id: &str,
        client: &ChatClient,
        refresh_title: bool,
    ) -> SummaryOutcome {
        let mut outcome = SummaryOutcome::default();
        let Some(session) = self.session(session_id).cloned() else {
            return outcome;
        };
        let config = &session.mask.model_config;
        if config.model.starts_with("dall-e") {
            return outcome;
        }
        let (model, provider) = summarize_model(config);
        let summary_config = ModelConfig {
            model,
            provider_name: provider,
            ..config.clone()
        };
        let messages = &session.messages;

        let wants_title = (self.app.enable_auto_generate_title
            && session.topic == DEFAULT_TOPIC
            && count_messages(messages) >= SUMMARIZE_MIN_LEN)
            || refresh_title;
        if wants_title {
            let start = messages.len().saturating_sub(config.history_message_count);
            let mut request_messages: Vec<RequestMessage> = messages[start..]
                .iter()
                .map(|m| RequestMessage::new(m.role, m.content.text()))
                .collect();
            request_messages.push(RequestMessage::new(Role::User, TOPIC_PROMPT));
            let request = ChatRequest {
                messages: request_messages,
                config: summary_config.clone(),
                stream: false,
                tools: Vec::new(),
            };
            match client.chat(request).collect_completion().await {
                Ok(completion) if completion.status == Some(200) => {
                    let topic = if completion.content.is_empty() {
                        DEFAULT_TOPIC.to_string()
                    } else {
                        trim_topic(&completion.content)
                    };
                    info!(session = %session_id, %topic, "generated topic");
                    if let Some(target) = self.session_mut(session_id) {
                        target.topic = topic;
                        outcome.topic_updated = true;
                    }
                }
                Ok(completion) => {
                    debug!(status = ?completion.status, "topic request ignored");
                }
                Err(err) => warn!(session = %session_id, error = %err, "topic generation failed"),
            }
        }

        let summarize_index = session
            .last_summarize_index
            .max(session.clear_context_index.unwrap_or(0))
            .min(messages.len());
        let mut pending: Vec<&ChatMessage> = messages[summarize_index..]
            .iter()
            .filter(|m| !m.is_error)
            .collect();
        let history_len = count_messages(pending.iter().copied());
        if history_len > config.max_tokens as usize {
            let keep_from = pending.len().saturating_sub(config.history_message_count);
            pending.drain(..keep_from);
        }

        let mut request_messages: Vec<RequestMessage> = Vec::new();
        if !session.memory_prompt.is_empty() {
            request_messages.push(RequestMessage::new(
                Role::System,
                memory_prompt(&session.memory_prompt),
            ));
        }
        request_messages.extend(
            pending
                .iter()
                .map(|m| RequestMessage::new(m.role, m.content.text())),
        );
        let last_summarize_index = messages.len();

        debug!(
            session = %session_id,
            history_len,
            threshold = config.compress_message_length_threshold,
            "checking memory compression"
        );
        if history_len > config.compress_message_length_threshold as usize && config.send_memory {
            request_messages.push(RequestMessage::new(Role::System, SUMMARIZE_PROMPT));
            let request = ChatRequest {
                messages: request_messages,
                config: summary_config,
                stream: true,
                tools: Vec::new(),
            };
            match client.chat(request).collect_completion().await {
                Ok(completion) if completion.status == Some(200) && !completion.aborted => {
                    info!(session = %session_id, chars = completion.content.len(), "memory updated");
                    if let Some(target) = self.session_mut(session_id) {
                        target.memory_prompt = completion.content;
                        target.last_summarize_index = last_summarize_index;
                        outcome.memory_updated = true;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(session = %session_id, error = %err, "memory summarization failed"),
            }
        }

        if outcome != SummaryOutcome::default() {
            self.persist(session_id);
        }
        outcome
    }

    fn persist_index(&self, index: usize) {
        if let Some(session) = self.sessions.get(index) {
            self.save(session);
        }
    }

    /// Write `session_id` through to storage, if any.
    pub fn persist(&self, session_id: &str) {
        if let Some(session) = self.session(session_id) {
            self.save(session);
        }
    }

    fn save(&self, session: &Session) {
        if let Some(storage) = &self.storage
            && let Err(err) = storage.save(session)
        {
            warn!(session = %session.id, error = %err, "could not save session");
        }
    }

    pub fn position_of(&self, session_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }
}
