use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Chat kind as reported by the platform's `chat.type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
}

impl ChatType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Group => "group",
            ChatType::Supergroup => "supergroup",
        }
    }

    /// Collapses `group`/`supergroup` into one analytics bucket key, keeping `private` distinct.
    pub fn bucket_key(self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Group | ChatType::Supergroup => "group",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four shapes of user intent the classifier recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    InlineQuery,
    ReplyMention,
    DirectMention,
    PrivatePhoto,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::InlineQuery => "inline_query",
            TriggerType::ReplyMention => "reply_mention",
            TriggerType::DirectMention => "direct_mention",
            TriggerType::PrivatePhoto => "private_photo",
        }
    }

    /// Group triggers require a reply target and carry `failure_dm_required` semantics.
    pub fn is_group(self) -> bool {
        matches!(self, TriggerType::ReplyMention | TriggerType::DirectMention)
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which consent regime governs processing for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    InlinePrivate,
    InlineGroup,
}

impl ConsentScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentScope::InlinePrivate => "inline_private",
            ConsentScope::InlineGroup => "inline_group",
        }
    }
}

impl std::fmt::Display for ConsentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `entities[]` element on an inbound message (only the shape the core reads).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i64,
    pub length: i64,
}

/// One element of `message.photo[]` — platform sends several sizes, largest last.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// The subset of a platform `Message` object the pipeline reads. Defensive by
/// construction: every optional field that the original schema allows absent
/// deserializes to `None` rather than failing the whole update.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InlineQuery {
    pub id: String,
    #[serde(default)]
    pub query: String,
    pub chat_type: ChatType,
    pub from: Sender,
}

/// The top-level, deeply-optional webhook payload. Unknown shapes deserialize fine and are simply
/// ignored downstream by the trigger classifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub inline_query: Option<InlineQuery>,
}

/// Durable job record handed from the dispatcher (C6) to the queue (C3) and
/// consumed by the worker (C8).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimateJob {
    pub job_id: Uuid,
    pub trigger_type: TriggerType,
    pub chat_type: ChatType,
    pub raw_chat_id: i64,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    pub photo_file_ids: Vec<String>,
    #[serde(default)]
    pub caption: Option<String>,
    pub source_user_id: i64,
    pub source_user_hash: String,
    pub chat_id_hash: String,
    pub consent_scope: ConsentScope,
    pub metadata: JobMetadata,
    pub enqueued_at: DateTime<Utc>,
}

/// Free-form per-job metadata. Kept as a concrete
/// struct rather than a raw JSON value since the only fields ever read are
/// these three; unknown keys round-trip through `extra`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub privacy_notice: bool,
    #[serde(default)]
    pub failure_dm_required: bool,
    #[serde(default)]
    pub placeholder_message_id: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EstimateJob {
    /// Validates the invariants that don't depend on photo-count policy
    /// (that one lives in `calorie-mediagroup::validate_photo_count`).
    pub fn validate(&self) -> Result<()> {
        if self.photo_file_ids.is_empty() || self.photo_file_ids.len() > 5 {
            return Err(CoreError::InvalidArgument(format!(
                "photo_file_ids must contain 1..5 entries, got {}",
                self.photo_file_ids.len()
            )));
        }
        if self.trigger_type == TriggerType::InlineQuery
            && self.chat_type != ChatType::Private
            && self.consent_scope != ConsentScope::InlineGroup
        {
            return Err(CoreError::InvalidArgument(
                "inline_query jobs require chat_type=private or consent_scope=inline_group"
                    .into(),
            ));
        }
        if self.trigger_type == TriggerType::ReplyMention && self.reply_to_message_id.is_none() {
            return Err(CoreError::InvalidArgument(
                "reply_mention jobs require reply_to_message_id".into(),
            ));
        }
        Ok(())
    }
}

/// A single estimated food item within a result.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimateItem {
    pub label: String,
    pub portion: String,
    pub kcal: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Macronutrients {
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fats_g: f64,
}

/// Structured estimate produced by the vision model (C7) and consumed by the
/// worker (C8) for persistence and delivery. Constructed only through
/// `EstimateResult::new`, which enforces the ordering invariant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimateResult {
    pub calories_mean: f64,
    pub calories_min: f64,
    pub calories_max: f64,
    pub macronutrients: Macronutrients,
    pub items: Vec<EstimateItem>,
    pub confidence: f64,
    pub model_latency_ms: u64,
    #[serde(default)]
    pub low_confidence: bool,
}

impl EstimateResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calories_mean: f64,
        calories_min: f64,
        calories_max: f64,
        macronutrients: Macronutrients,
        items: Vec<EstimateItem>,
        confidence: f64,
        model_latency_ms: u64,
    ) -> Result<Self> {
        if !(calories_min <= calories_mean && calories_mean <= calories_max) {
            return Err(CoreError::InvalidArgument(format!(
                "calories_min ({calories_min}) <= calories_mean ({calories_mean}) <= calories_max ({calories_max}) violated"
            )));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::InvalidArgument(format!(
                "confidence {confidence} out of [0,1]"
            )));
        }
        let low_confidence = confidence < 0.2;
        Ok(Self {
            calories_mean,
            calories_min,
            calories_max,
            macronutrients,
            items,
            confidence,
            model_latency_ms,
            low_confidence,
        })
    }
}

/// Rate-limiter record for the permission-notice store (C2).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermissionNotice {
    pub chat_id_hash: String,
    pub source_user_hash: String,
    pub last_notified_at: DateTime<Utc>,
}

/// One `(reason, count)` pair inside a daily bucket or a telemetry snapshot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FailureReasonCount {
    pub reason: String,
    pub count: u64,
}

/// Durable daily rollup written by C9, keyed by `(date, chat_type)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InlineAnalyticsDaily {
    pub date: chrono::NaiveDate,
    pub chat_type: String,
    pub trigger_counts: std::collections::BTreeMap<String, u64>,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub permission_block_count: u64,
    pub avg_ack_latency_ms: f64,
    pub p95_result_latency_ms: f64,
    pub accuracy_within_tolerance_pct: f64,
    pub failure_reasons: Vec<FailureReasonCount>,
    pub last_updated_at: DateTime<Utc>,
}

/// Read-only projection of C1's windowed counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InlineMetricsSnapshot {
    pub sample_size: usize,
    pub ack_p95_ms: u64,
    pub result_p95_ms: u64,
    pub permission_blocks: u64,
    pub permission_blocks_by_chat: std::collections::BTreeMap<String, u64>,
    pub failure_reasons: std::collections::BTreeMap<String, u64>,
    pub avg_accuracy_delta_pct: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_macros() -> Macronutrients {
        Macronutrients {
            protein_g: 20.0,
            carbs_g: 30.0,
            fats_g: 10.0,
        }
    }

    #[test]
    fn estimate_result_rejects_out_of_order_calories() {
        let err = EstimateResult::new(400.0, 450.0, 500.0, sample_macros(), vec![], 0.8, 1200)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn estimate_result_accepts_well_ordered_calories() {
        let result =
            EstimateResult::new(450.0, 400.0, 500.0, sample_macros(), vec![], 0.8, 1200).unwrap();
        assert!(result.calories_min <= result.calories_mean);
        assert!(result.calories_mean <= result.calories_max);
        assert!(!result.low_confidence);
    }

    #[test]
    fn estimate_result_flags_low_confidence() {
        let result =
            EstimateResult::new(450.0, 400.0, 500.0, sample_macros(), vec![], 0.1, 1200).unwrap();
        assert!(result.low_confidence);
    }

    fn sample_job(trigger: TriggerType, chat_type: ChatType) -> EstimateJob {
        EstimateJob {
            job_id: Uuid::new_v4(),
            trigger_type: trigger,
            chat_type,
            raw_chat_id: -100500600,
            thread_id: Some(55),
            reply_to_message_id: Some(123),
            photo_file_ids: vec!["file-1".into()],
            caption: None,
            source_user_id: 1,
            source_user_hash: "h".into(),
            chat_id_hash: "c".into(),
            consent_scope: ConsentScope::InlineGroup,
            metadata: JobMetadata::default(),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn job_rejects_empty_photo_list() {
        let mut job = sample_job(TriggerType::ReplyMention, ChatType::Supergroup);
        job.photo_file_ids.clear();
        assert!(job.validate().is_err());
    }

    #[test]
    fn job_rejects_six_photos() {
        let mut job = sample_job(TriggerType::ReplyMention, ChatType::Supergroup);
        job.photo_file_ids = (0..6).map(|i| format!("file-{i}")).collect();
        assert!(job.validate().is_err());
    }

    #[test]
    fn reply_mention_requires_reply_target() {
        let mut job = sample_job(TriggerType::ReplyMention, ChatType::Supergroup);
        job.reply_to_message_id = None;
        assert!(job.validate().is_err());
    }

    #[test]
    fn inline_query_private_chat_is_valid() {
        let mut job = sample_job(TriggerType::InlineQuery, ChatType::Private);
        job.consent_scope = ConsentScope::InlinePrivate;
        assert!(job.validate().is_ok());
    }

    #[test]
    fn inline_query_group_without_group_consent_is_rejected() {
        let mut job = sample_job(TriggerType::InlineQuery, ChatType::Supergroup);
        job.consent_scope = ConsentScope::InlinePrivate;
        assert!(job.validate().is_err());
    }
}
