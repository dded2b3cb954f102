//! Trigger classification. Maps a
//! platform update to a `{inline_query, reply_mention, direct_mention,
//! private_photo}` decision with the context the dispatcher needs to build
//! an `EstimateJob`. Unknown shapes classify to `None` — the dispatcher
//! ignores those, it never treats them as errors.

use calorie_core::types::{ChatType, ConsentScope, JobMetadata, Message, TriggerType, Update};

/// The bot's own identity, used to recognize `@mention` entities aimed at it.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub username: String,
}

impl BotIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    fn handle(&self) -> String {
        format!("@{}", self.username)
    }
}

/// Everything the webhook dispatcher (C6) needs to build an `EstimateJob`
/// once a trigger has been classified.
#[derive(Debug, Clone)]
pub struct TriggerDecision {
    pub trigger_type: TriggerType,
    pub chat_type: ChatType,
    pub consent_scope: ConsentScope,
    pub raw_chat_id: i64,
    pub thread_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub photo_file_ids: Vec<String>,
    pub caption: Option<String>,
    pub source_user_id: i64,
    pub metadata: JobMetadata,
    /// Set only for `inline_query` — needed to answer the inline query.
    pub inline_query_id: Option<String>,
}

/// Finds an entity of kind `mention`/`text_mention` at byte offset `0..len`
/// whose covered text equals the bot's `@handle`. Telegram offsets are
/// UTF-16 code units upstream; the core works in `char` counts, which is
/// exact for the ASCII bot handles this system issues.
fn begins_with_bot_mention(message: &Message, bot: &BotIdentity) -> bool {
    let Some(text) = &message.text else {
        return false;
    };
    let handle = bot.handle();
    let chars: Vec<char> = text.chars().collect();

    message.entities.iter().any(|entity| {
        (entity.kind == "mention" || entity.kind == "text_mention")
            && entity.offset == 0
            && entity_text(&chars, entity.offset, entity.length) == Some(handle.clone())
    })
}

fn contains_bot_mention(message: &Message, bot: &BotIdentity) -> bool {
    let Some(text) = &message.text else {
        return false;
    };
    let handle = bot.handle();
    let chars: Vec<char> = text.chars().collect();

    message.entities.iter().any(|entity| {
        (entity.kind == "mention" || entity.kind == "text_mention")
            && entity_text(&chars, entity.offset, entity.length) == Some(handle.clone())
    })
}

fn entity_text(chars: &[char], offset: i64, length: i64) -> Option<String> {
    let start = usize::try_from(offset).ok()?;
    let len = usize::try_from(length).ok()?;
    let end = start.checked_add(len)?;
    if end > chars.len() {
        return None;
    }
    Some(chars[start..end].iter().collect())
}

/// Largest (last) photo size on a message, which is what the platform's
/// estimation pipeline consumes.
fn largest_photo_file_id(message: &Message) -> Option<String> {
    message.photo.last().map(|p| p.file_id.clone())
}

/// Classifies `update` into a trigger decision. Returns `None` for any
/// update shape that isn't a recognized trigger.
pub fn classify(update: &Update, bot: &BotIdentity) -> Option<TriggerDecision> {
    if let Some(inline_query) = &update.inline_query {
        if inline_query.chat_type == ChatType::Private && !inline_query.query.trim().is_empty() {
            let mut metadata = JobMetadata::default();
            metadata.privacy_notice = true;
            return Some(TriggerDecision {
                trigger_type: TriggerType::InlineQuery,
                chat_type: ChatType::Private,
                consent_scope: ConsentScope::InlinePrivate,
                raw_chat_id: inline_query.from.id,
                thread_id: None,
                reply_to_message_id: None,
                photo_file_ids: Vec::new(),
                caption: Some(inline_query.query.clone()),
                source_user_id: inline_query.from.id,
                metadata,
                inline_query_id: Some(inline_query.id.clone()),
            });
        }
        return None;
    }

    let message = update.message.as_ref()?;
    let source_user_id = message.from.as_ref().map(|f| f.id)?;

    if message.chat.chat_type == ChatType::Private {
        if largest_photo_file_id(message).is_some() {
            return Some(TriggerDecision {
                trigger_type: TriggerType::PrivatePhoto,
                chat_type: ChatType::Private,
                consent_scope: ConsentScope::InlinePrivate,
                raw_chat_id: message.chat.id,
                thread_id: None,
                reply_to_message_id: None,
                photo_file_ids: message.photo.iter().map(|p| p.file_id.clone()).collect(),
                caption: message.caption.clone(),
                source_user_id,
                metadata: JobMetadata::default(),
                inline_query_id: None,
            });
        }
        return None;
    }

    // Group / supergroup from here on.
    if begins_with_bot_mention(message, bot) {
        if let Some(reply_to) = &message.reply_to_message {
            if let Some(file_id) = largest_photo_file_id(reply_to) {
                let mut metadata = JobMetadata::default();
                metadata.failure_dm_required = true;
                return Some(TriggerDecision {
                    trigger_type: TriggerType::ReplyMention,
                    chat_type: message.chat.chat_type,
                    consent_scope: ConsentScope::InlineGroup,
                    raw_chat_id: message.chat.id,
                    thread_id: message.message_thread_id,
                    reply_to_message_id: Some(reply_to.message_id),
                    photo_file_ids: vec![file_id],
                    caption: reply_to.caption.clone(),
                    source_user_id,
                    metadata,
                    inline_query_id: None,
                });
            }
        }
    }

    if contains_bot_mention(message, bot) && largest_photo_file_id(message).is_some() {
        return Some(TriggerDecision {
            trigger_type: TriggerType::DirectMention,
            chat_type: message.chat.chat_type,
            consent_scope: ConsentScope::InlineGroup,
            raw_chat_id: message.chat.id,
            thread_id: message.message_thread_id,
            reply_to_message_id: Some(message.message_id),
            photo_file_ids: message.photo.iter().map(|p| p.file_id.clone()).collect(),
            caption: message.caption.clone(),
            source_user_id,
            metadata: JobMetadata::default(),
            inline_query_id: None,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use calorie_core::types::{Chat, InlineQuery, MessageEntity, PhotoSize, Sender};

    fn bot() -> BotIdentity {
        BotIdentity::new("CalorieTrackAI_bot")
    }

    fn photo(file_id: &str) -> PhotoSize {
        PhotoSize {
            file_id: file_id.to_string(),
            file_unique_id: format!("uniq-{file_id}"),
            width: 800,
            height: 600,
            file_size: Some(12345),
        }
    }

    #[test]
    fn group_reply_mention_classifies_with_reply_target() {
        let text = "@CalorieTrackAI_bot fail this please";
        let mention_len = "@CalorieTrackAI_bot".chars().count() as i64;
        let update = Update {
            update_id: 1,
            message: Some(Message {
                message_id: 999,
                chat: Chat {
                    id: -100500600,
                    chat_type: ChatType::Supergroup,
                },
                from: Some(Sender {
                    id: 7,
                    username: Some("alice".into()),
                }),
                message_thread_id: Some(55),
                media_group_id: None,
                caption: None,
                text: Some(text.to_string()),
                entities: vec![MessageEntity {
                    kind: "mention".into(),
                    offset: 0,
                    length: mention_len,
                }],
                photo: vec![],
                reply_to_message: Some(Box::new(Message {
                    message_id: 123,
                    chat: Chat {
                        id: -100500600,
                        chat_type: ChatType::Supergroup,
                    },
                    from: None,
                    message_thread_id: None,
                    media_group_id: None,
                    caption: None,
                    text: None,
                    entities: vec![],
                    photo: vec![photo("file-failure-1")],
                    reply_to_message: None,
                })),
            }),
            inline_query: None,
        };

        let decision = classify(&update, &bot()).expect("should classify");
        assert_eq!(decision.trigger_type, TriggerType::ReplyMention);
        assert_eq!(decision.consent_scope, ConsentScope::InlineGroup);
        assert_eq!(decision.reply_to_message_id, Some(123));
        assert_eq!(decision.thread_id, Some(55));
        assert!(decision.metadata.failure_dm_required);
        assert_eq!(decision.photo_file_ids, vec!["file-failure-1".to_string()]);
    }

    #[test]
    fn private_inline_query_classifies_with_privacy_notice() {
        let update = Update {
            update_id: 2,
            message: None,
            inline_query: Some(InlineQuery {
                id: "INLINE-PVT-1".into(),
                query: "{\"file_id\":\"pvt-file-1\"}".into(),
                chat_type: ChatType::Private,
                from: Sender {
                    id: 55,
                    username: Some("bob".into()),
                },
            }),
        };

        let decision = classify(&update, &bot()).expect("should classify");
        assert_eq!(decision.trigger_type, TriggerType::InlineQuery);
        assert_eq!(decision.consent_scope, ConsentScope::InlinePrivate);
        assert!(decision.metadata.privacy_notice);
        assert_eq!(decision.inline_query_id.as_deref(), Some("INLINE-PVT-1"));
    }

    #[test]
    fn direct_mention_with_photo_in_same_message() {
        let text = "@CalorieTrackAI_bot what is this";
        let mention_len = "@CalorieTrackAI_bot".chars().count() as i64;
        let update = Update {
            update_id: 3,
            message: Some(Message {
                message_id: 42,
                chat: Chat {
                    id: -100999,
                    chat_type: ChatType::Group,
                },
                from: Some(Sender {
                    id: 9,
                    username: None,
                }),
                message_thread_id: None,
                media_group_id: None,
                caption: None,
                text: Some(text.to_string()),
                entities: vec![MessageEntity {
                    kind: "mention".into(),
                    offset: 0,
                    length: mention_len,
                }],
                photo: vec![photo("file-direct-1")],
                reply_to_message: None,
            }),
            inline_query: None,
        };

        let decision = classify(&update, &bot()).expect("should classify");
        assert_eq!(decision.trigger_type, TriggerType::DirectMention);
        assert_eq!(decision.reply_to_message_id, Some(42));
    }

    #[test]
    fn private_photo_without_mention_classifies() {
        let update = Update {
            update_id: 4,
            message: Some(Message {
                message_id: 10,
                chat: Chat {
                    id: 555,
                    chat_type: ChatType::Private,
                },
                from: Some(Sender {
                    id: 555,
                    username: None,
                }),
                message_thread_id: None,
                media_group_id: None,
                caption: Some("lunch".into()),
                text: None,
                entities: vec![],
                photo: vec![photo("file-private-1")],
                reply_to_message: None,
            }),
            inline_query: None,
        };

        let decision = classify(&update, &bot()).expect("should classify");
        assert_eq!(decision.trigger_type, TriggerType::PrivatePhoto);
        assert_eq!(decision.consent_scope, ConsentScope::InlinePrivate);
    }

    #[test]
    fn unrelated_group_text_yields_no_decision() {
        let update = Update {
            update_id: 5,
            message: Some(Message {
                message_id: 11,
                chat: Chat {
                    id: -1,
                    chat_type: ChatType::Group,
                },
                from: Some(Sender {
                    id: 1,
                    username: None,
                }),
                message_thread_id: None,
                media_group_id: None,
                caption: None,
                text: Some("just chatting".into()),
                entities: vec![],
                photo: vec![],
                reply_to_message: None,
            }),
            inline_query: None,
        };

        assert!(classify(&update, &bot()).is_none());
    }
}
