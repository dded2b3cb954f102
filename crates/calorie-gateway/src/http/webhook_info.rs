//! GET /bot/webhook-info. Thin passthrough over the platform's
//! own `getWebhookInfo` call.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use teloxide::prelude::*;
use tracing::warn;

use crate::app::AppState;

pub async fn webhook_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let info = state.bot.get_webhook_info().await.map_err(|e| {
        warn!(error = %e, "failed to fetch webhook info from platform");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "failed to fetch webhook info"})),
        )
    })?;

    Ok(Json(json!({
        "webhook_info": {
            "url": info.url,
            "last_error_message": info.last_error_message,
            "pending_update_count": info.pending_update_count,
        }
    })))
}
