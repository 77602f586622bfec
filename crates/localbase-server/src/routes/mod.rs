pub mod auth;
pub mod debug;
pub mod rest;

use axum::{response::IntoResponse, Json};
use localbase_core::ApiError;
use serde_json::json;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "service": "localbase" }))
}

pub async fn not_found() -> impl IntoResponse {
    crate::respond::AppError(ApiError::not_found("No route for this path"))
}
