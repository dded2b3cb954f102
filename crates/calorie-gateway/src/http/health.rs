//! GET /live, /ready, /healthz — all three return the same shape;
//! distinct routes exist for the conventions different platform probes expect.

use axum::Json;
use serde_json::{json, Value};

pub async fn live() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn ready() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
