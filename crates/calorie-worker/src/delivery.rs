//! Chat-output delivery for the estimate worker.
//! Reuses `calorie_core::telegram_send`'s chunking/escaping helpers nearly
//! unchanged. Expressed as a trait, matching
//! `calorie-gateway::chat_sender::ChatSender`'s shape, so tests can
//! substitute a recording double instead of a live `teloxide::Bot`.

use async_trait::async_trait;
use calorie_core::telegram_send::{send_response, ReplyTarget};
use calorie_core::types::{ChatType, ConsentScope, EstimateJob, EstimateResult};
use calorie_core::FailureReason;
use teloxide::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("platform delivery error: {0}")]
    Platform(String),
}

impl From<teloxide::RequestError> for DeliveryError {
    fn from(e: teloxide::RequestError) -> Self {
        DeliveryError::Platform(e.to_string())
    }
}

/// Renders an `EstimateResult` as the message text sent to chat.
pub fn format_result_message(result: &EstimateResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Estimated calories: {:.0} kcal ({:.0}-{:.0})\n",
        result.calories_mean, result.calories_min, result.calories_max
    ));
    out.push_str(&format!(
        "Protein {:.0}g · Carbs {:.0}g · Fat {:.0}g\n",
        result.macronutrients.protein_g, result.macronutrients.carbs_g, result.macronutrients.fats_g
    ));
    if !result.items.is_empty() {
        out.push('\n');
        for item in &result.items {
            out.push_str(&format!("- {} ({}): {:.0} kcal\n", item.label, item.portion, item.kcal));
        }
    }
    if result.low_confidence {
        out.push_str("\n(low confidence estimate)");
    }
    out
}

/// A redacted failure message sent to the source user in DM, never naming
/// the originating group chat.
pub fn format_failure_dm(reason: FailureReason) -> String {
    format!("I couldn't estimate calories for your recent photo: {}", reason.user_message())
}

/// True when the failure path requires the redacted DM fallback rather
/// than an in-place reply.
pub fn requires_failure_dm(job: &EstimateJob) -> bool {
    job.metadata.failure_dm_required && job.consent_scope == ConsentScope::InlineGroup
}

/// Where a job's chat output goes: the source user's DM
/// for private/inline-private jobs, the originating chat for group ones.
fn output_chat_id(job: &EstimateJob) -> ChatId {
    match job.chat_type {
        ChatType::Private => ChatId(job.source_user_id),
        ChatType::Group | ChatType::Supergroup => ChatId(job.raw_chat_id),
    }
}

fn reply_target(job: &EstimateJob) -> ReplyTarget {
    ReplyTarget {
        thread_id: job.thread_id,
        reply_to_message_id: job.reply_to_message_id,
    }
}

/// Named interface the estimate worker (C8) depends on for its three
/// outbound deliveries.
#[async_trait]
pub trait ChatDelivery: Send + Sync {
    async fn deliver_result(&self, job: &EstimateJob, result: &EstimateResult) -> Result<(), DeliveryError>;
    async fn deliver_generic_error(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError>;
    async fn deliver_failure_dm(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError>;
}

/// Production delivery backed by a `teloxide::Bot`.
pub struct TelegramChatDelivery {
    bot: Bot,
}

impl TelegramChatDelivery {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatDelivery for TelegramChatDelivery {
    /// Delivers a successful estimate: a direct message for
    /// private/inline-private jobs, a threaded reply for group ones.
    async fn deliver_result(&self, job: &EstimateJob, result: &EstimateResult) -> Result<(), DeliveryError> {
        let text = format_result_message(result);
        send_response(&self.bot, output_chat_id(job), &text, reply_target(job)).await?;
        Ok(())
    }

    /// A failed job's in-place, generic error reply.
    async fn deliver_generic_error(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError> {
        send_response(&self.bot, output_chat_id(job), reason.user_message(), reply_target(job)).await?;
        Ok(())
    }

    /// Redacted DM sent to the source user when `metadata.failure_dm_required`
    /// and `consent_scope=inline_group`.
    async fn deliver_failure_dm(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError> {
        let text = format_failure_dm(reason);
        send_response(&self.bot, ChatId(job.source_user_id), &text, ReplyTarget::default()).await?;
        Ok(())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every call instead of talking to the platform. `fail_dm` lets
    /// tests simulate a platform refusal on the failure-DM path.
    #[derive(Default)]
    pub struct RecordingChatDelivery {
        pub results: Mutex<Vec<uuid::Uuid>>,
        pub generic_errors: Mutex<Vec<(uuid::Uuid, FailureReason)>>,
        pub failure_dms: Mutex<Vec<(uuid::Uuid, FailureReason)>>,
        pub fail_dm: bool,
    }

    #[async_trait]
    impl ChatDelivery for RecordingChatDelivery {
        async fn deliver_result(&self, job: &EstimateJob, _result: &EstimateResult) -> Result<(), DeliveryError> {
            self.results.lock().unwrap().push(job.job_id);
            Ok(())
        }

        async fn deliver_generic_error(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError> {
            self.generic_errors.lock().unwrap().push((job.job_id, reason));
            Ok(())
        }

        async fn deliver_failure_dm(&self, job: &EstimateJob, reason: FailureReason) -> Result<(), DeliveryError> {
            self.failure_dms.lock().unwrap().push((job.job_id, reason));
            if self.fail_dm {
                return Err(DeliveryError::Platform("bot blocked by user".into()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calorie_core::types::{EstimateItem, Macronutrients};

    fn sample_result(confidence: f64) -> EstimateResult {
        EstimateResult::new(
            450.0,
            400.0,
            500.0,
            Macronutrients {
                protein_g: 20.0,
                carbs_g: 30.0,
                fats_g: 10.0,
            },
            vec![EstimateItem {
                label: "chicken".into(),
                portion: "150g".into(),
                kcal: 250.0,
            }],
            confidence,
            1200,
        )
        .unwrap()
    }

    #[test]
    fn formats_calories_and_items() {
        let text = format_result_message(&sample_result(0.8));
        assert!(text.contains("450"));
        assert!(text.contains("chicken"));
        assert!(!text.contains("low confidence"));
    }

    #[test]
    fn flags_low_confidence_in_message() {
        let text = format_result_message(&sample_result(0.1));
        assert!(text.contains("low confidence"));
    }

    #[test]
    fn failure_dm_never_names_the_group_chat() {
        let text = format_failure_dm(FailureReason::ModelError);
        assert!(!text.contains("-100"));
    }

    fn sample_job(consent: ConsentScope, failure_dm: bool) -> EstimateJob {
        use calorie_core::types::{JobMetadata, TriggerType};
        use chrono::Utc;
        use uuid::Uuid;

        EstimateJob {
            job_id: Uuid::new_v4(),
            trigger_type: TriggerType::ReplyMention,
            chat_type: ChatType::Supergroup,
            raw_chat_id: -100500600,
            thread_id: Some(55),
            reply_to_message_id: Some(123),
            photo_file_ids: vec!["file-1".into()],
            caption: None,
            source_user_id: 7,
            source_user_hash: "h".into(),
            chat_id_hash: "c".into(),
            consent_scope: consent,
            metadata: JobMetadata {
                failure_dm_required: failure_dm,
                ..Default::default()
            },
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn requires_dm_only_for_group_consent_with_flag_set() {
        assert!(requires_failure_dm(&sample_job(ConsentScope::InlineGroup, true)));
        assert!(!requires_failure_dm(&sample_job(ConsentScope::InlineGroup, false)));
        assert!(!requires_failure_dm(&sample_job(ConsentScope::InlinePrivate, true)));
    }
}
