//! GET /api/v1/analytics/inline-summary.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use calorie_core::types::ChatType;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;

const ACK_TARGET_MS: u64 = 3_000;
const ACCURACY_TOLERANCE_PCT: f64 = 5.0;

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    #[serde(default)]
    pub chat_type: Option<ChatType>,
}

pub async fn inline_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let buckets = state
        .analytics
        .range_query(query.range_start, query.range_end, query.chat_type)
        .map_err(|e| {
            warn!(error = %e, "analytics range query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "failed to load analytics range"})),
            )
        })?;

    Ok(Json(json!({
        "range": {"start": query.range_start, "end": query.range_end},
        "sla": {"ack_target_ms": ACK_TARGET_MS},
        "accuracy": {"tolerance_pct": ACCURACY_TOLERANCE_PCT},
        "buckets": buckets,
    })))
}
