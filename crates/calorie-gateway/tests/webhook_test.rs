//! HTTP-level coverage of `POST /bot` against a fully wired router: a plain
//! photo upload, a media-group burst, and a permission-denied DM, all
//! exercised end to end.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use calorie_analytics::InlineAnalyticsAggregator;
use calorie_core::config::{
    AnalyticsConfig, AppConfig, AppEnv, DatabaseConfig, GatewayConfig, HashingConfig,
    ObjectStoreConfig, OpenAiConfig, RedisConfig, TelegramConfig,
};
use calorie_gateway::app::{build_router, AppState};
use calorie_gateway::chat_sender::test_support::RecordingChatSender;
use calorie_mediagroup::MediaGroupAggregator;
use calorie_permission::InMemoryPermissionNoticeStore;
use calorie_queue::InMemoryJobQueue;
use calorie_telemetry::InlineTelemetry;
use calorie_trigger::BotIdentity;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> AppConfig {
    AppConfig {
        app_env: AppEnv::Dev,
        gateway: GatewayConfig::default(),
        database: DatabaseConfig {
            database_url: Some("postgres://localhost/test".into()),
            supabase_url: None,
            supabase_db_password: None,
        },
        redis: RedisConfig {
            redis_url: "redis://localhost".into(),
        },
        openai: OpenAiConfig {
            openai_api_key: "test-key".into(),
            openai_model: "gpt-5-mini".into(),
        },
        object_store: ObjectStoreConfig {
            aws_endpoint_url_s3: "https://example.com".into(),
            aws_access_key_id: "id".into(),
            aws_secret_access_key: "secret".into(),
            bucket_name: "bucket".into(),
            aws_region: "auto".into(),
        },
        hashing: HashingConfig {
            hash_salt: "test-salt".into(),
        },
        telegram: TelegramConfig {
            bot_token: "123:abc".into(),
            bot_username: "CalorieTrackAI_bot".into(),
        },
        analytics: AnalyticsConfig::default(),
    }
}

fn test_app() -> (axum::Router, Arc<RecordingChatSender>) {
    let sender = Arc::new(RecordingChatSender::default());
    let state = Arc::new(AppState {
        config: test_config(),
        telemetry: InlineTelemetry::default(),
        permissions: Box::new(InMemoryPermissionNoticeStore::new()),
        queue: Box::new(InMemoryJobQueue::new()),
        mediagroup: MediaGroupAggregator::new(),
        analytics: InlineAnalyticsAggregator::open_in_memory().unwrap(),
        bot_identity: BotIdentity::new("CalorieTrackAI_bot"),
        chat_sender: sender.clone(),
        bot: teloxide::Bot::new("123:abc"),
    });
    (build_router(state), sender)
}

async fn post_update(router: axum::Router, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bot")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn group_reply_mention_enqueues_and_acks() {
    let (router, sender) = test_app();

    let update = json!({
        "update_id": 1,
        "message": {
            "message_id": 999,
            "chat": {"id": -100500600, "type": "supergroup"},
            "from": {"id": 7, "username": "alice"},
            "message_thread_id": 55,
            "text": "@CalorieTrackAI_bot fail this please",
            "entities": [{"type": "mention", "offset": 0, "length": 19}],
            "reply_to_message": {
                "message_id": 123,
                "chat": {"id": -100500600, "type": "supergroup"},
                "photo": [{"file_id": "file-failure-1", "file_unique_id": "u1", "width": 800, "height": 600}]
            }
        }
    });

    let (status, body) = post_update(router, update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["trigger_type"], "reply_mention");
    assert!(body["job_id"].is_string());

    let placeholders = sender.group_placeholders.lock().unwrap();
    assert_eq!(placeholders.len(), 1);
    assert_eq!(placeholders[0].0, -100500600);
    assert_eq!(placeholders[0].1, Some(55));
}

#[tokio::test]
async fn private_inline_query_acknowledges_with_privacy_notice() {
    let (router, sender) = test_app();

    let update = json!({
        "update_id": 2,
        "inline_query": {
            "id": "INLINE-PVT-1",
            "query": "{\"file_id\":\"pvt-file-1\"}",
            "chat_type": "private",
            "from": {"id": 55, "username": "bob"}
        }
    });

    let (status, body) = post_update(router, update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["trigger_type"], "inline_query");

    let acks = sender.inline_acks.lock().unwrap();
    assert_eq!(acks.len(), 1);
    assert!(acks[0].1.contains("Privacy notice"));
    assert!(acks[0].1.contains("View the inline usage guide"));
}

#[tokio::test]
async fn photo_over_limit_returns_http_400() {
    let (router, _sender) = test_app();

    let photos: Vec<Value> = (0..6)
        .map(|i| json!({"file_id": format!("file-{i}"), "file_unique_id": format!("u{i}"), "width": 800, "height": 600}))
        .collect();

    let update = json!({
        "update_id": 3,
        "message": {
            "message_id": 20,
            "chat": {"id": 999, "type": "private"},
            "from": {"id": 999},
            "photo": photos
        }
    });

    let (status, body) = post_update(router, update).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_input");
    assert!(body["message"].as_str().unwrap().contains("Maximum 5 photos"));
}

#[tokio::test]
async fn unparseable_payload_is_ignored_not_rejected() {
    let (router, _sender) = test_app();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bot")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn successful_ack_is_reflected_in_analytics_summary() {
    let (router, _sender) = test_app();

    let update = json!({
        "update_id": 4,
        "message": {
            "message_id": 30,
            "chat": {"id": 777, "type": "private"},
            "from": {"id": 777},
            "photo": [{"file_id": "file-ack", "file_unique_id": "u1", "width": 800, "height": 600}]
        }
    });
    let (status, _body) = post_update(router.clone(), update).await;
    assert_eq!(status, StatusCode::OK);

    let today = chrono::Utc::now().date_naive();
    let response = router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/v1/analytics/inline-summary?range_start={today}&range_end={today}"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    let buckets = body["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0]["request_count"], 1);
    assert_eq!(buckets[0]["success_count"], 1);
    assert!(buckets[0]["avg_ack_latency_ms"].is_number());
}

#[tokio::test]
async fn health_endpoints_report_ok() {
    let (router, _sender) = test_app();
    for path in ["/live", "/ready", "/healthz"] {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
