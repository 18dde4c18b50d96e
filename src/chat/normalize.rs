//! Reshape message content into what a provider will accept.

use crate::types::{ContentPart, MessageContent, Role};

/// Capability switches applied while normalizing one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub vision: bool,
    /// Keep structured file parts; otherwise they become a text marker.
    pub files: bool,
    /// Whether the wire format takes a list of parts at all.
    pub accepts_parts: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            vision: false,
            files: false,
            accepts_parts: true,
        }
    }
}

/// Remove rendered thinking: blockquote lines and blank lines.
pub fn strip_thinking(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.starts_with("> ") && !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn file_marker(name: &str) -> String {
    format!("[File attached: {name}]")
}

pub fn normalize_content(
    role: Role,
    content: &MessageContent,
    options: NormalizeOptions,
) -> MessageContent {
    let normalized = match content {
        MessageContent::Text(text) => MessageContent::Text(text.clone()),
        MessageContent::Parts(parts) => normalize_parts(parts, content, options),
    };
    match (role, normalized) {
        (Role::Assistant, MessageContent::Text(text)) => {
            MessageContent::Text(strip_thinking(&text))
        }
        (_, normalized) => normalized,
    }
}

fn normalize_parts(
    parts: &[ContentPart],
    original: &MessageContent,
    options: NormalizeOptions,
) -> MessageContent {
    let mut kept: Vec<ContentPart> = Vec::with_capacity(parts.len());
    let mut markers: Vec<String> = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text { text } if text.trim().is_empty() => {}
            ContentPart::Text { .. } => kept.push(part.clone()),
            ContentPart::ImageUrl { .. } if options.vision => kept.push(part.clone()),
            ContentPart::ImageUrl { .. } => {}
            ContentPart::FileUrl { .. } if options.files && options.accepts_parts => {
                kept.push(part.clone())
            }
            ContentPart::FileUrl { file_url } => markers.push(file_marker(&file_url.name)),
        }
    }

    if !markers.is_empty() {
        let marker_text = markers.join("\n");
        let last_text = kept.iter_mut().rev().find_map(|part| match part {
            ContentPart::Text { text } => Some(text),
            _ => None,
        });
        match last_text {
            Some(text) => {
                text.push('\n');
                text.push_str(&marker_text);
            }
            None => kept.push(ContentPart::text(marker_text)),
        }
    }

    collapse(kept, original, options.accepts_parts)
}

/// Collapse text-only part lists to a string, or force a string when the
/// wire format rejects lists. Empty results fall back to the original text.
fn collapse(
    parts: Vec<ContentPart>,
    original: &MessageContent,
    accepts_parts: bool,
) -> MessageContent {
    if parts.is_empty() {
        return MessageContent::Text(original.text());
    }
    if parts.iter().all(ContentPart::is_text) || !accepts_parts {
        let joined = join_text(&parts);
        if joined.is_empty() {
            return MessageContent::Text(original.text());
        }
        return MessageContent::Text(joined);
    }
    MessageContent::Parts(parts)
}

fn join_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop every part rejected by `keep`, re-collapsing what remains.
/// `original` supplies the fallback text when nothing survives.
pub fn strip_parts(
    content: &MessageContent,
    original: &MessageContent,
    keep: impl Fn(&ContentPart) -> bool,
) -> MessageContent {
    match content {
        MessageContent::Text(_) => content.clone(),
        MessageContent::Parts(parts) => {
            let remaining: Vec<ContentPart> =
                parts.iter().filter(|part| keep(part)).cloned().collect();
            collapse(remaining, original, true)
        }
    }
}
