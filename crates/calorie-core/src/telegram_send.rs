//! Outbound chat-delivery helpers, shared by the webhook dispatcher (C6) and
//! the estimate worker (C8).
//!
//! Telegram's message limit is 4096 characters; 4090 is used for safety.
//! MarkdownV2 is tried first, falling back to plain text if Telegram rejects
//! the escaped payload.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ThreadId};
use tracing::warn;

const CHUNK_MAX: usize = 4090;

/// Code-fence-aware message splitter.
pub fn split_chunks_smart(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in &lines {
        let cost = if current.is_empty() {
            line.len()
        } else {
            1 + line.len()
        };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                if lang.is_empty() {
                    current.push_str("```\n");
                } else {
                    current.push_str("```");
                    current.push_str(lang);
                    current.push('\n');
                }
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
        } else {
            let mut remaining = chunk.as_str();
            while remaining.len() > CHUNK_MAX {
                let split_at = remaining[..CHUNK_MAX]
                    .rfind('\n')
                    .or_else(|| remaining[..CHUNK_MAX].rfind(' '))
                    .unwrap_or(CHUNK_MAX);
                result.push(remaining[..split_at].to_string());
                remaining = remaining[split_at..].trim_start();
            }
            if !remaining.is_empty() {
                result.push(remaining.to_string());
            }
        }
    }

    result
}

/// Escape special characters for Telegram MarkdownV2: `_ * [ ] ( ) ~ \` # + - = | { } . !`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|'
            | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Optional thread/reply targeting for a group delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyTarget {
    pub thread_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
}

/// Sends `text` to `chat_id` in smart-chunked messages, optionally threaded
/// to a source message. Tries MarkdownV2 first; falls back to plain text per
/// chunk on rejection. A 100ms delay separates consecutive chunks.
///
/// Returns `Err` only when every send attempt for the first chunk failed,
/// which callers treat as a platform permission/delivery refusal.
pub async fn send_response(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    target: ReplyTarget,
) -> Result<(), teloxide::RequestError> {
    let chunks = split_chunks_smart(text);
    let mut first_error = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let escaped = escape_markdown_v2(chunk);

        let mut request = bot
            .send_message(chat_id, &escaped)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(thread_id) = target.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread_id as i32)));
        }
        if i == 0 {
            if let Some(reply_to) = target.reply_to_message_id {
                request = request.reply_to_message_id(MessageId(reply_to as i32));
            }
        }

        if let Err(e) = request.await {
            let mut fallback = bot.send_message(chat_id, chunk);
            if let Some(thread_id) = target.thread_id {
                fallback = fallback.message_thread_id(ThreadId(MessageId(thread_id as i32)));
            }
            if i == 0 {
                if let Some(reply_to) = target.reply_to_message_id {
                    fallback = fallback.reply_to_message_id(MessageId(reply_to as i32));
                }
            }
            if let Err(fallback_err) = fallback.await {
                warn!(error = %fallback_err, markdown_error = %e, chunk_index = i, "failed to deliver chat message");
                if i == 0 {
                    first_error = Some(fallback_err);
                }
            }
        }

        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks_smart("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Hello, world!");
    }

    #[test]
    fn exactly_chunk_max_is_single_chunk() {
        let text = "a".repeat(CHUNK_MAX);
        let chunks = split_chunks_smart(&text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(2000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn very_long_single_line_force_splits() {
        let text = "x".repeat(9000);
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn code_fence_preserved_across_chunks() {
        let mut text = String::from("Intro.\n```rust\n");
        for i in 0..200 {
            text.push_str(&format!("let variable_name_{i:04} = {i:05}; // comment\n"));
        }
        text.push_str("```\nAfter fence.");

        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn escape_markdown_v2_escapes_specials() {
        let input = "Hello. World! (test) [link] ~strike~";
        let escaped = escape_markdown_v2(input);
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\)"));
        assert!(escaped.contains("\\["));
        assert!(escaped.contains("\\]"));
        assert!(escaped.contains("\\~"));
    }

    #[test]
    fn escape_markdown_v2_leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }
}
