use thiserror::Error;

/// Crate-wide error type for configuration, hashing, and validation failures
/// that don't belong to a single downstream component.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// The failure taxonomy every caught error in the pipeline maps to, exactly
/// one variant each, before it reaches telemetry or the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Caller-visible validation failure (photo count, MIME, size, missing fields). HTTP 400.
    InvalidInput,
    /// Platform refused delivery (blocked by user, missing group rights).
    PermissionDenied,
    /// External call exceeded its deadline.
    Timeout,
    /// Vision model returned malformed/unusable output after one retry.
    ModelError,
    /// Any other caught exception in the worker.
    ProcessingError,
    /// Model rate-limit or cost cap hit.
    QuotaExhausted,
}

impl FailureReason {
    /// Stable wire/log identifier, matching the `snake_case` enum values above.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::InvalidInput => "invalid_input",
            FailureReason::PermissionDenied => "permission_denied",
            FailureReason::Timeout => "timeout",
            FailureReason::ModelError => "model_error",
            FailureReason::ProcessingError => "processing_error",
            FailureReason::QuotaExhausted => "quota_exhausted",
        }
    }

    /// User-facing message for a failure that reaches chat delivery.
    pub fn user_message(self) -> &'static str {
        match self {
            FailureReason::InvalidInput => "That didn't look like a valid photo submission.",
            FailureReason::PermissionDenied => {
                "I don't have permission to reply here — please allow me to send messages."
            }
            FailureReason::Timeout => "error, try again later",
            FailureReason::ModelError => "error, try again later",
            FailureReason::ProcessingError => "Something went wrong while estimating that meal.",
            FailureReason::QuotaExhausted => "try again in a few minutes",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
