//! Outbound side-effects the dispatcher (C6) triggers alongside enqueue
//!: the group placeholder reply, the permission notice,
//! and the inline-query acknowledgement. Expressed as a trait so tests can
//! substitute a recording double instead of a live `teloxide::Bot`.

use async_trait::async_trait;
use calorie_core::telegram_send::{send_response, ReplyTarget};
use calorie_core::types::TriggerType;
use teloxide::prelude::*;
use teloxide::types::{InlineQueryResult, InlineQueryResultArticle, InputMessageContent, InputMessageContentText};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ChatSendError {
    #[error("platform delivery error: {0}")]
    Platform(String),
}

impl From<teloxide::RequestError> for ChatSendError {
    fn from(e: teloxide::RequestError) -> Self {
        ChatSendError::Platform(e.to_string())
    }
}

#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_group_inline_placeholder(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        reply_to_message_id: Option<i64>,
        job_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<(), ChatSendError>;

    async fn send_permission_notice(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), ChatSendError>;

    async fn send_inline_query_acknowledgement(
        &self,
        inline_query_id: &str,
        placeholder_text: &str,
    ) -> Result<(), ChatSendError>;

    async fn send_media_group_overflow_notice(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
    ) -> Result<(), ChatSendError>;
}

/// The sentence the inline-private acknowledgement text always carries.
pub fn inline_query_placeholder_text(privacy_notice: bool) -> String {
    if privacy_notice {
        "Estimating calories for this meal… Privacy notice: only you can see \
         this result. View the inline usage guide for details on what we \
         store."
            .to_string()
    } else {
        "Estimating calories for this meal…".to_string()
    }
}

fn group_placeholder_text(trigger_type: TriggerType) -> String {
    match trigger_type {
        TriggerType::ReplyMention => {
            "Estimating calories for this meal, I'll reply in this thread shortly.".to_string()
        }
        _ => "Estimating calories for this meal, I'll reply here shortly.".to_string(),
    }
}

fn permission_notice_text() -> &'static str {
    "I don't have permission to reply in this chat yet — an admin needs to \
     grant me message permissions before I can share calorie estimates here."
}

fn media_group_overflow_notice_text() -> &'static str {
    "Maximum 5 photos per message for better calorie estimation — only the \
     first 5 photos in this album will be analyzed."
}

/// Production sender backed by a `teloxide::Bot`.
pub struct TelegramChatSender {
    bot: Bot,
}

impl TelegramChatSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatSender for TelegramChatSender {
    async fn send_group_inline_placeholder(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        reply_to_message_id: Option<i64>,
        _job_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<(), ChatSendError> {
        let text = group_placeholder_text(trigger_type);
        send_response(
            &self.bot,
            ChatId(chat_id),
            &text,
            ReplyTarget {
                thread_id,
                reply_to_message_id,
            },
        )
        .await?;
        Ok(())
    }

    async fn send_permission_notice(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), ChatSendError> {
        send_response(
            &self.bot,
            ChatId(chat_id),
            permission_notice_text(),
            ReplyTarget {
                thread_id,
                reply_to_message_id,
            },
        )
        .await?;
        Ok(())
    }

    async fn send_inline_query_acknowledgement(
        &self,
        inline_query_id: &str,
        placeholder_text: &str,
    ) -> Result<(), ChatSendError> {
        let article = InlineQueryResultArticle::new(
            "calorie-estimate-ack",
            "Estimating your meal…",
            InputMessageContent::Text(InputMessageContentText::new(placeholder_text)),
        )
        .description(placeholder_text);

        self.bot
            .answer_inline_query(inline_query_id, vec![InlineQueryResult::Article(article)])
            .await?;
        Ok(())
    }

    async fn send_media_group_overflow_notice(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
    ) -> Result<(), ChatSendError> {
        send_response(
            &self.bot,
            ChatId(chat_id),
            media_group_overflow_notice_text(),
            ReplyTarget {
                thread_id,
                reply_to_message_id: None,
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every call instead of talking to the platform, for dispatcher tests.
    #[derive(Default)]
    pub struct RecordingChatSender {
        pub group_placeholders: Mutex<Vec<(i64, Option<i64>, Option<i64>, TriggerType)>>,
        pub permission_notices: Mutex<Vec<(i64, Option<i64>)>>,
        pub inline_acks: Mutex<Vec<(String, String)>>,
        pub overflow_notices: Mutex<Vec<(i64, Option<i64>)>>,
    }

    #[async_trait]
    impl ChatSender for RecordingChatSender {
        async fn send_group_inline_placeholder(
            &self,
            chat_id: i64,
            thread_id: Option<i64>,
            reply_to_message_id: Option<i64>,
            _job_id: Uuid,
            trigger_type: TriggerType,
        ) -> Result<(), ChatSendError> {
            self.group_placeholders.lock().unwrap().push((
                chat_id,
                thread_id,
                reply_to_message_id,
                trigger_type,
            ));
            Ok(())
        }

        async fn send_permission_notice(
            &self,
            chat_id: i64,
            thread_id: Option<i64>,
            _reply_to_message_id: Option<i64>,
        ) -> Result<(), ChatSendError> {
            self.permission_notices.lock().unwrap().push((chat_id, thread_id));
            Ok(())
        }

        async fn send_inline_query_acknowledgement(
            &self,
            inline_query_id: &str,
            placeholder_text: &str,
        ) -> Result<(), ChatSendError> {
            self.inline_acks
                .lock()
                .unwrap()
                .push((inline_query_id.to_string(), placeholder_text.to_string()));
            Ok(())
        }

        async fn send_media_group_overflow_notice(
            &self,
            chat_id: i64,
            thread_id: Option<i64>,
        ) -> Result<(), ChatSendError> {
            self.overflow_notices.lock().unwrap().push((chat_id, thread_id));
            Ok(())
        }
    }
}
