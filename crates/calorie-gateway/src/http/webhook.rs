//! POST /bot — the webhook ingress endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use calorie_analytics::{EventOutcome, InlineEvent};
use calorie_core::types::{ChatType, TriggerType, Update};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::app::AppState;
use crate::dispatch::{handle_update, HandleOutcome};

#[derive(Serialize)]
struct WebhookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_type: Option<TriggerType>,
}

/// C9 consumes the same ack-latency event C1 does — recorded here, at the
/// point the response is about to be written, rather than reconstructed
/// later from a telemetry snapshot.
fn record_ack_event(
    state: &AppState,
    trigger_type: TriggerType,
    chat_type: ChatType,
    ack_latency_ms: u64,
    outcome: EventOutcome,
) {
    let event = InlineEvent {
        date: chrono::Utc::now().date_naive(),
        chat_type,
        trigger_type,
        outcome,
        permission_block: false,
        ack_latency_ms: Some(ack_latency_ms),
        result_latency_ms: None,
        accuracy_delta_pct: None,
    };
    if let Err(e) = state.analytics.record_event(&event) {
        warn!(error = %e, "failed to record ack-latency analytics event");
    }
}

/// Never blocks the platform response on estimation. Malformed JSON and unrecognized update
/// shapes both report HTTP 200 `{status:"ignored"}` so the platform never
/// retries; only a classified-but-invalid submission (e.g. too many photos)
/// is a caller-visible HTTP 400.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let start = Instant::now();

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "unparseable webhook payload, ignoring");
            return Ok(Json(json!({"status": "ignored"})));
        }
    };

    let outcome = handle_update(&state, update).await;
    let ack_latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        HandleOutcome::Ignored => Ok(Json(serde_json::to_value(WebhookResponse {
            status: "ignored",
            job_id: None,
            trigger_type: None,
        })
        .expect("WebhookResponse always serializes"))),
        HandleOutcome::Buffered => Ok(Json(serde_json::to_value(WebhookResponse {
            status: "buffered",
            job_id: None,
            trigger_type: None,
        })
        .expect("WebhookResponse always serializes"))),
        HandleOutcome::Ok(out) => {
            state.telemetry.record_ack_latency(out.trigger_type, ack_latency_ms);
            record_ack_event(&state, out.trigger_type, out.chat_type, ack_latency_ms, EventOutcome::Success);
            Ok(Json(serde_json::to_value(WebhookResponse {
                status: "ok",
                job_id: Some(out.job_id),
                trigger_type: Some(out.trigger_type),
            })
            .expect("WebhookResponse always serializes")))
        }
        HandleOutcome::Invalid { message, trigger_type, chat_type } => {
            state.telemetry.record_ack_latency(trigger_type, ack_latency_ms);
            state.telemetry.record_failure(trigger_type, calorie_core::FailureReason::InvalidInput);
            record_ack_event(
                &state,
                trigger_type,
                chat_type,
                ack_latency_ms,
                EventOutcome::Failure(calorie_core::FailureReason::InvalidInput),
            );
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "invalid_input", "message": message})),
            ))
        }
    }
}
