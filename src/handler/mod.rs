//! HTTP request handlers
//!
//! Handlers validate input, delegate to the product service or the session
//! store and shape the JSON envelope. Errors are returned as [`AppError`],
//! which renders the `{ success: false, ... }` body.
//!
//! [`AppError`]: crate::error::AppError

pub mod cart;
pub mod orders;
pub mod products;
pub mod wishlist;

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

/// Liveness probe
///
/// `GET /health` returns `{ "status": "OK", "timestamp": "..." }`.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Route not found"
        })),
    )
}
