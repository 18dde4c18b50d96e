//! Tokenizer-free token estimation.

use crate::types::{ContentPart, MessageContent};

pub const IMAGE_TOKEN_COST: usize = 1000;
pub const DEFAULT_FILE_TOKEN_COST: usize = 50;

/// Approximate token count of a string.
///
/// ASCII letters cost a quarter token, other ASCII half a token and everything
/// else (CJK, emoji, ...) one and a half.
pub fn estimate_text(input: &str) -> usize {
    let total: f64 = input
        .chars()
        .map(|c| match c as u32 {
            65..=122 => 0.25,
            0..=127 => 0.5,
            _ => 1.5,
        })
        .sum();
    total.ceil() as usize
}

pub fn estimate_part(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => estimate_text(text),
        ContentPart::ImageUrl { .. } => IMAGE_TOKEN_COST,
        ContentPart::FileUrl { file_url } => file_url
            .token_count
            .map(|count| count as usize)
            .unwrap_or(DEFAULT_FILE_TOKEN_COST),
    }
}

pub fn estimate(content: &MessageContent) -> usize {
    match content {
        MessageContent::Text(text) => estimate_text(text),
        MessageContent::Parts(parts) => parts.iter().map(estimate_part).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UploadFile;

    #[test]
    fn ascii_letters_are_cheapest() {
        assert_eq!(estimate_text(""), 0);
        assert_eq!(estimate_text("abcd"), 1);
        assert_eq!(estimate_text("abcde"), 2);
        assert_eq!(estimate_text("1 2 "), 2);
    }

    #[test]
    fn non_ascii_costs_more() {
        assert_eq!(estimate_text("你好"), 3);
    }

    #[test]
    fn parts_sum_fixed_costs() {
        let file = UploadFile {
            url: "blob:1".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            token_count: None,
        };
        let sized = UploadFile {
            token_count: Some(7),
            ..file.clone()
        };
        let content = MessageContent::Parts(vec![
            ContentPart::text("abcd"),
            ContentPart::image("data:image/png;base64,AA"),
            ContentPart::file(file),
            ContentPart::file(sized),
        ]);
        assert_eq!(estimate(&content), 1 + 1000 + 50 + 7);
    }
}
