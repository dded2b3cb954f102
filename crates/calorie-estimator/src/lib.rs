//! Vision-model adapter.
//!
//! Wraps a single vision-capable chat-completion call: N photo URLs plus an
//! optional caption/description go in, a structured [`EstimateResult`]
//! comes out. A single retry follows malformed model output before the
//! call is given up as a model error.

use std::time::Duration;

use async_trait::async_trait;
use calorie_core::types::{EstimateItem, EstimateResult, Macronutrients};
use calorie_core::FailureReason;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Wall-clock deadline for a single estimation call.
pub const ESTIMATE_TIMEOUT: Duration = Duration::from_secs(30);
/// Below this confidence, a successful parse is still flagged `low_confidence`.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.2;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("vision model call timed out")]
    Timeout,

    #[error("vision model returned malformed output: {0}")]
    ModelError(String),

    #[error("vision model quota exhausted")]
    QuotaExhausted,

    #[error("http error calling vision model: {0}")]
    Http(String),
}

impl EstimatorError {
    /// Maps onto the shared failure taxonomy for telemetry/logging.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            EstimatorError::Timeout => FailureReason::Timeout,
            EstimatorError::ModelError(_) => FailureReason::ModelError,
            EstimatorError::QuotaExhausted => FailureReason::QuotaExhausted,
            EstimatorError::Http(_) => FailureReason::ProcessingError,
        }
    }
}

pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Named interface the estimate worker (C8) depends on.
#[async_trait]
pub trait CalorieEstimator: Send + Sync {
    async fn estimate_from_photos(
        &self,
        urls: &[String],
        description: Option<&str>,
    ) -> Result<EstimateResult>;
}

/// The structured JSON contract requested from the vision model:
/// `kcal_mean, kcal_min, kcal_max, confidence, items[], macronutrients{protein,carbs,fats}`.
#[derive(Debug, Deserialize)]
struct RawEstimate {
    kcal_mean: f64,
    kcal_min: f64,
    kcal_max: f64,
    confidence: f64,
    #[serde(default)]
    items: Vec<RawItem>,
    macronutrients: RawMacros,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    label: String,
    #[serde(default)]
    portion: String,
    kcal: f64,
}

#[derive(Debug, Deserialize)]
struct RawMacros {
    protein: f64,
    carbs: f64,
    fats: f64,
}

fn system_prompt() -> &'static str {
    "You are a nutrition-estimation assistant. Given one or more meal photos \
     and an optional description, respond with a single JSON object and \
     nothing else, with exactly these fields: kcal_mean (number), kcal_min \
     (number), kcal_max (number), confidence (number in [0,1]), items (array \
     of {label, portion, kcal}), macronutrients ({protein, carbs, fats} in \
     grams). kcal_min must be <= kcal_mean must be <= kcal_max."
}

fn build_request_body(model: &str, urls: &[String], description: Option<&str>) -> serde_json::Value {
    let mut content: Vec<serde_json::Value> = Vec::with_capacity(urls.len() + 1);
    let text = match description {
        Some(desc) if !desc.trim().is_empty() => {
            format!("Estimate calories and macronutrients for this meal. Caption: {desc}")
        }
        _ => "Estimate calories and macronutrients for this meal.".to_string(),
    };
    content.push(serde_json::json!({ "type": "text", "text": text }));
    for url in urls {
        content.push(serde_json::json!({
            "type": "image_url",
            "image_url": { "url": url },
        }));
    }

    serde_json::json!({
        "model": model,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": system_prompt() },
            { "role": "user", "content": content },
        ],
    })
}

fn parse_estimate(content: &str) -> std::result::Result<EstimateResult, String> {
    let raw: RawEstimate =
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;

    EstimateResult::new(
        raw.kcal_mean,
        raw.kcal_min,
        raw.kcal_max,
        Macronutrients {
            protein_g: raw.macronutrients.protein,
            carbs_g: raw.macronutrients.carbs,
            fats_g: raw.macronutrients.fats,
        },
        raw.items
            .into_iter()
            .map(|i| EstimateItem {
                label: i.label,
                portion: i.portion,
                kcal: i.kcal,
            })
            .collect(),
        raw.confidence,
        0,
    )
    .map_err(|e| e.to_string())
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Production estimator backed by an OpenAI-compatible vision chat-completion
/// endpoint.
pub struct OpenAiVisionEstimator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiVisionEstimator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    async fn call_once(&self, urls: &[String], description: Option<&str>) -> Result<String> {
        let body = build_request_body(&self.model, urls, description);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EstimatorError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(EstimatorError::QuotaExhausted);
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EstimatorError::Http(format!("status {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| EstimatorError::ModelError(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| EstimatorError::ModelError("empty choices[0].message.content".into()))
    }
}

#[async_trait]
impl CalorieEstimator for OpenAiVisionEstimator {
    /// Sends one vision-model call; if the response is malformed JSON,
    /// retries exactly once before failing with `model_error`.
    /// The whole attempt, including the retry, is bounded by
    /// [`ESTIMATE_TIMEOUT`]; a deadline hit fails with `timeout`.
    async fn estimate_from_photos(
        &self,
        urls: &[String],
        description: Option<&str>,
    ) -> Result<EstimateResult> {
        let model_latency_start = tokio::time::Instant::now();

        let attempt = tokio::time::timeout(ESTIMATE_TIMEOUT, async {
            let first = self.call_once(urls, description).await?;
            match parse_estimate(&first) {
                Ok(result) => Ok(result),
                Err(first_err) => {
                    warn!(error = %first_err, "vision model returned malformed JSON, retrying once");
                    let second = self.call_once(urls, description).await?;
                    parse_estimate(&second).map_err(EstimatorError::ModelError)
                }
            }
        })
        .await;

        let mut result = match attempt {
            Ok(inner) => inner?,
            Err(_) => return Err(EstimatorError::Timeout),
        };
        result.model_latency_ms = model_latency_start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

/// Deterministic test double: returns a canned, well-ordered estimate
/// without any network I/O. Used by `calorie-worker`'s test suite.
#[cfg(any(test, feature = "testing"))]
pub struct FakeCalorieEstimator {
    pub response: std::sync::Mutex<Result<EstimateResult>>,
}

#[cfg(any(test, feature = "testing"))]
impl FakeCalorieEstimator {
    pub fn succeeding(result: EstimateResult) -> Self {
        Self {
            response: std::sync::Mutex::new(Ok(result)),
        }
    }

    pub fn failing(err: EstimatorError) -> Self {
        Self {
            response: std::sync::Mutex::new(Err(err)),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl CalorieEstimator for FakeCalorieEstimator {
    async fn estimate_from_photos(
        &self,
        _urls: &[String],
        _description: Option<&str>,
    ) -> Result<EstimateResult> {
        let mut guard = self.response.lock().unwrap();
        match &mut *guard {
            Ok(result) => Ok(result.clone()),
            Err(EstimatorError::Timeout) => Err(EstimatorError::Timeout),
            Err(EstimatorError::ModelError(m)) => Err(EstimatorError::ModelError(m.clone())),
            Err(EstimatorError::QuotaExhausted) => Err(EstimatorError::QuotaExhausted),
            Err(EstimatorError::Http(m)) => Err(EstimatorError::Http(m.clone())),
        }
    }
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
    fn parses_well_formed_structured_response() {
        let content = serde_json::json!({
            "kcal_mean": 450.0,
            "kcal_min": 400.0,
            "kcal_max": 500.0,
            "confidence": 0.8,
            "items": [{"label": "chicken", "portion": "150g", "kcal": 250.0}],
            "macronutrients": {"protein": 20.0, "carbs": 30.0, "fats": 10.0},
        })
        .to_string();

        let result = parse_estimate(&content).unwrap();
        assert_eq!(result.calories_mean, 450.0);
        assert_eq!(result.items.len(), 1);
        assert!(!result.low_confidence);
    }

    #[test]
    fn flags_low_confidence_below_threshold() {
        let content = serde_json::json!({
            "kcal_mean": 450.0,
            "kcal_min": 400.0,
            "kcal_max": 500.0,
            "confidence": 0.1,
            "items": [],
            "macronutrients": {"protein": 20.0, "carbs": 30.0, "fats": 10.0},
        })
        .to_string();

        let result = parse_estimate(&content).unwrap();
        assert!(result.low_confidence);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_estimate("not json at all").is_err());
    }

    #[test]
    fn rejects_out_of_order_calories() {
        let content = serde_json::json!({
            "kcal_mean": 600.0,
            "kcal_min": 400.0,
            "kcal_max": 500.0,
            "confidence": 0.8,
            "items": [],
            "macronutrients": {"protein": 20.0, "carbs": 30.0, "fats": 10.0},
        })
        .to_string();

        assert!(parse_estimate(&content).is_err());
    }

    #[test]
    fn request_body_includes_all_photo_urls_and_caption() {
        let urls = vec!["https://example.com/a.jpg".to_string(), "https://example.com/b.jpg".to_string()];
        let body = build_request_body("gpt-5-mini", &urls, Some("Chicken pasta"));
        let content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3); // text + 2 images
        assert!(content[0]["text"].as_str().unwrap().contains("Chicken pasta"));
    }

    #[tokio::test]
    async fn fake_estimator_returns_canned_result() {
        let result = EstimateResult::new(450.0, 400.0, 500.0, sample_macros(), vec![], 0.8, 1200)
            .unwrap();
        let estimator = FakeCalorieEstimator::succeeding(result);
        let out = estimator
            .estimate_from_photos(&["https://example.com/a.jpg".to_string()], None)
            .await
            .unwrap();
        assert_eq!(out.calories_mean, 450.0);
    }

    #[tokio::test]
    async fn fake_estimator_can_simulate_timeout() {
        let estimator = FakeCalorieEstimator::failing(EstimatorError::Timeout);
        let err = estimator
            .estimate_from_photos(&["https://example.com/a.jpg".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EstimatorError::Timeout));
        assert_eq!(err.failure_reason(), FailureReason::Timeout);
    }
}
