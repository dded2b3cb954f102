//! Shared application state and router wiring.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use calorie_analytics::InlineAnalyticsAggregator;
use calorie_core::config::AppConfig;
use calorie_mediagroup::MediaGroupAggregator;
use calorie_permission::PermissionNoticeStore;
use calorie_queue::JobQueue;
use calorie_telemetry::InlineTelemetry;
use calorie_trigger::BotIdentity;
use tower_http::trace::TraceLayer;

use crate::chat_sender::ChatSender;
use crate::http;

/// Every collaborator the dispatcher and the read-only HTTP surfaces need,
/// bundled once at startup and shared behind an `Arc` across requests.
pub struct AppState {
    pub config: AppConfig,
    pub telemetry: InlineTelemetry,
    pub permissions: Box<dyn PermissionNoticeStore>,
    pub queue: Box<dyn JobQueue>,
    pub mediagroup: MediaGroupAggregator,
    pub analytics: InlineAnalyticsAggregator,
    pub bot_identity: BotIdentity,
    pub chat_sender: Arc<dyn ChatSender>,
    /// Kept alongside `chat_sender` (rather than behind it) for the
    /// diagnostic endpoints that call the platform API directly.
    pub bot: teloxide::Bot,
}

/// Wires the webhook entrypoint, the two diagnostic endpoints the
/// platform/operators poll, and the analytics read model.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/bot", post(http::webhook::handle_webhook))
        .route("/bot/webhook-info", get(http::webhook_info::webhook_info))
        .route(
            "/api/v1/analytics/inline-summary",
            get(http::analytics::inline_summary),
        )
        .route("/live", get(http::health::live))
        .route("/ready", get(http::health::ready))
        .route("/healthz", get(http::health::healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
