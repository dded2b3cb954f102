use tracing_subscriber::EnvFilter;

use crate::types::{ChatType, TriggerType};

/// Installs the global tracing subscriber. `RUST_LOG` (or the fallback
/// below) controls verbosity; every downstream crate just calls `tracing::`
/// macros and relies on this having run once at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,calorie=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// The stage tags a job moves through inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineStage {
    Dequeued,
    AnalysisStarted,
    AnalysisCompleted,
    DeliveryCompleted,
    Failed,
}

impl InlineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            InlineStage::Dequeued => "dequeued",
            InlineStage::AnalysisStarted => "analysis_started",
            InlineStage::AnalysisCompleted => "analysis_completed",
            InlineStage::DeliveryCompleted => "delivery_completed",
            InlineStage::Failed => "failed",
        }
    }
}

/// The structured fields every inline-pipeline log event carries. Plain
/// data holder — callers pass these into `tracing`'s structured-field
/// macros rather than string-interpolating them.
#[derive(Debug, Clone)]
pub struct CorrelationFields {
    pub correlation_id: String,
    pub inline_trigger: Option<TriggerType>,
    pub inline_stage: Option<InlineStage>,
    pub chat_type: Option<ChatType>,
    pub user_hash: Option<String>,
}

impl CorrelationFields {
    /// Correlation id is the job_id once one is allocated, else the raw
    /// update_id.
    pub fn from_update_id(update_id: i64) -> Self {
        Self {
            correlation_id: update_id.to_string(),
            inline_trigger: None,
            inline_stage: None,
            chat_type: None,
            user_hash: None,
        }
    }

    pub fn from_job_id(job_id: uuid::Uuid) -> Self {
        Self {
            correlation_id: job_id.to_string(),
            inline_trigger: None,
            inline_stage: None,
            chat_type: None,
            user_hash: None,
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.inline_trigger = Some(trigger);
        self
    }

    pub fn with_stage(mut self, stage: InlineStage) -> Self {
        self.inline_stage = Some(stage);
        self
    }

    pub fn with_chat_type(mut self, chat_type: ChatType) -> Self {
        self.chat_type = Some(chat_type);
        self
    }

    pub fn with_user_hash(mut self, user_hash: impl Into<String>) -> Self {
        self.user_hash = Some(user_hash.into());
        self
    }

    /// Emits an info-level structured log line carrying every field set so
    /// far. Kept as a single call site so every caller logs the same shape.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            inline_trigger = self.inline_trigger.map(|t| t.as_str()),
            inline_stage = self.inline_stage.map(|s| s.as_str()),
            chat_type = self.chat_type.map(|c| c.as_str()),
            user_hash = self.user_hash.as_deref(),
            "{message}"
        );
    }

    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            inline_trigger = self.inline_trigger.map(|t| t.as_str()),
            inline_stage = self.inline_stage.map(|s| s.as_str()),
            chat_type = self.chat_type.map(|c| c.as_str()),
            user_hash = self.user_hash.as_deref(),
            "{message}"
        );
    }

    pub fn log_error(&self, message: &str) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            inline_trigger = self.inline_trigger.map(|t| t.as_str()),
            inline_stage = self.inline_stage.map(|s| s.as_str()),
            chat_type = self.chat_type.map(|c| c.as_str()),
            user_hash = self.user_hash.as_deref(),
            "{message}"
        );
    }
}
