//! Webhook dispatcher pipeline, kept free of Axum so it can be
//! exercised directly in tests. `crate::http::webhook` is the thin adapter
//! that turns this into the `POST /bot` handler.

use std::sync::Arc;

use calorie_core::hashing::{chat_id_hash, source_user_hash};
use calorie_core::types::{ChatType, EstimateJob, TriggerType, Update};
use calorie_mediagroup::{get_media_group_id, validate_photo_count, FinalizedMediaGroup, IngestOutcome};
use calorie_trigger::{classify, BotIdentity, TriggerDecision};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::app::AppState;
use crate::chat_sender::inline_query_placeholder_text;

/// How long the dispatcher waits on a media-group buffer before giving up
/// on ever finalizing it. The HTTP response never waits on this — it's the
/// deadline for the detached finalization task.
const MEDIA_GROUP_FINALIZE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub job_id: Uuid,
    pub trigger_type: TriggerType,
    pub chat_type: ChatType,
}

/// Result of routing one webhook update through the pipeline.
#[derive(Debug)]
pub enum HandleOutcome {
    Ignored,
    Buffered,
    Ok(DispatchOutcome),
    Invalid {
        message: String,
        trigger_type: TriggerType,
        chat_type: ChatType,
    },
}

#[derive(Deserialize)]
struct InlineQueryFilePayload {
    file_id: String,
}

/// `inline_query.query` carries a JSON payload naming an already-uploaded
/// photo's `file_id`.
fn parse_inline_query_file_id(query: &str) -> Option<String> {
    serde_json::from_str::<InlineQueryFilePayload>(query)
        .ok()
        .map(|p| p.file_id)
}

/// Wraps `calorie_trigger::classify`, resolving the inline-query case's
/// JSON-encoded `query` field down to a concrete `photo_file_ids` entry so
/// the rest of the pipeline never has to special-case it.
fn classify_update(update: &Update, bot_identity: &BotIdentity) -> Option<TriggerDecision> {
    let mut decision = classify(update, bot_identity)?;
    if decision.trigger_type == TriggerType::InlineQuery {
        let raw_query = decision.caption.take().unwrap_or_default();
        let file_id = parse_inline_query_file_id(&raw_query)?;
        decision.photo_file_ids = vec![file_id];
    }
    Some(decision)
}

/// The shared tail of the pipeline — permission check through delivery —
/// used by both the synchronous (non-media-group) path and the detached
/// media-group finalization task.
async fn process_trigger_decision(
    state: &AppState,
    decision: TriggerDecision,
) -> Result<DispatchOutcome, DispatchError> {
    let salt = &state.config.hashing.hash_salt;
    let chat_hash = chat_id_hash(salt, decision.raw_chat_id);
    let user_hash = source_user_hash(salt, decision.source_user_id);

    // Step 5: for group triggers, a due permission notice is sent and marked
    // before anything else. `record_permission_block` is reserved for the
    // worker's platform-refusal path, never here.
    if decision.trigger_type.is_group() {
        let due = state.permissions.due(&chat_hash, &user_hash).await.unwrap_or(true);
        if due {
            if let Err(e) = state
                .chat_sender
                .send_permission_notice(decision.raw_chat_id, decision.thread_id, decision.reply_to_message_id)
                .await
            {
                tracing::warn!(error = %e, "permission notice delivery failed");
            }
            if let Err(e) = state.permissions.mark(&chat_hash, &user_hash).await {
                tracing::warn!(error = %e, "failed to mark permission notice as sent");
            }
        }
    }

    // Step 6.
    validate_photo_count(decision.photo_file_ids.len())
        .map_err(|e| DispatchError::InvalidInput(e.message().to_string()))?;

    // Step 7.
    let job = EstimateJob {
        job_id: Uuid::new_v4(),
        trigger_type: decision.trigger_type,
        chat_type: decision.chat_type,
        raw_chat_id: decision.raw_chat_id,
        thread_id: decision.thread_id,
        reply_to_message_id: decision.reply_to_message_id,
        photo_file_ids: decision.photo_file_ids.clone(),
        caption: decision.caption.clone(),
        source_user_id: decision.source_user_id,
        source_user_hash: user_hash,
        chat_id_hash: chat_hash,
        consent_scope: decision.consent_scope,
        metadata: decision.metadata.clone(),
        enqueued_at: Utc::now(),
    };
    job.validate().map_err(|e| DispatchError::InvalidInput(e.to_string()))?;

    state
        .queue
        .enqueue(&job)
        .await
        .map_err(|e| DispatchError::Internal(e.to_string()))?;

    // Step 8. Side-effects are independent of each other and of the enqueue
    // above, which has already happened — fire them concurrently.
    let group_send = async {
        if decision.trigger_type.is_group() {
            if let Err(e) = state
                .chat_sender
                .send_group_inline_placeholder(
                    decision.raw_chat_id,
                    decision.thread_id,
                    decision.reply_to_message_id,
                    job.job_id,
                    decision.trigger_type,
                )
                .await
            {
                tracing::warn!(error = %e, job_id = %job.job_id, "group placeholder delivery failed");
            }
        }
    };
    let inline_ack = async {
        if let Some(inline_query_id) = &decision.inline_query_id {
            let text = inline_query_placeholder_text(decision.metadata.privacy_notice);
            if let Err(e) = state
                .chat_sender
                .send_inline_query_acknowledgement(inline_query_id, &text)
                .await
            {
                tracing::warn!(error = %e, job_id = %job.job_id, "inline query acknowledgement failed");
            }
        }
    };
    tokio::join!(group_send, inline_ack);

    Ok(DispatchOutcome {
        job_id: job.job_id,
        trigger_type: decision.trigger_type,
        chat_type: decision.chat_type,
    })
}

/// Finalizes a buffered media group on its own task, never on the HTTP
/// response path. The representative update (first in
/// arrival order) supplies chat/sender/mention context for classification;
/// its own single photo is then replaced with the finalized, ordered list.
async fn process_finalized_media_group(state: &AppState, finalized: FinalizedMediaGroup) {
    let Some(representative) = finalized.updates.first() else {
        return;
    };
    let Some(mut decision) = classify_update(representative, &state.bot_identity) else {
        tracing::debug!(
            media_group_id = %finalized.media_group_id,
            "media group did not classify to any trigger"
        );
        return;
    };
    decision.photo_file_ids = finalized.photo_file_ids.clone();
    if finalized.caption.is_some() {
        decision.caption = finalized.caption.clone();
    }

    if let Err(e) = process_trigger_decision(state, decision).await {
        tracing::warn!(
            media_group_id = %finalized.media_group_id,
            error = %e,
            "failed to process finalized media group"
        );
    }
}

/// Routes one webhook update through the full pipeline. `state` is an `Arc` only so the media-group branch can hand a
/// clone to its detached finalization task.
pub async fn handle_update(state: &Arc<AppState>, update: Update) -> HandleOutcome {
    if let Some(group_id) = get_media_group_id(&update) {
        let chat_id = update.message.as_ref().map(|m| m.chat.id);
        let thread_id = update.message.as_ref().and_then(|m| m.message_thread_id);

        if let Some(IngestOutcome::Overflow { .. }) = state.mediagroup.ingest(update) {
            if let Some(chat_id) = chat_id {
                let state = Arc::clone(state);
                tokio::spawn(async move {
                    if let Err(e) = state
                        .chat_sender
                        .send_media_group_overflow_notice(chat_id, thread_id)
                        .await
                    {
                        tracing::warn!(error = %e, "media group overflow notice delivery failed");
                    }
                });
            }
        }

        let state = Arc::clone(state);
        tokio::spawn(async move {
            if let Some(finalized) = state
                .mediagroup
                .wait_for_media_group_complete(&group_id, None, MEDIA_GROUP_FINALIZE_TIMEOUT_MS)
                .await
            {
                process_finalized_media_group(&state, finalized).await;
            }
        });
        return HandleOutcome::Buffered;
    }

    let Some(decision) = classify_update(&update, &state.bot_identity) else {
        return HandleOutcome::Ignored;
    };
    let trigger_type = decision.trigger_type;
    let chat_type = decision.chat_type;

    match process_trigger_decision(state, decision).await {
        Ok(outcome) => HandleOutcome::Ok(outcome),
        Err(DispatchError::InvalidInput(message)) => {
            HandleOutcome::Invalid { message, trigger_type, chat_type }
        }
        Err(DispatchError::Internal(message)) => {
            HandleOutcome::Invalid { message, trigger_type, chat_type }
        }
    }
}
