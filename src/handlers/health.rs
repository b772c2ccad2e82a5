//! Liveness and readiness probes.

use crate::db::DbPool;
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

/// Liveness probe.
///
/// # Response (200 OK)
///
/// `{}`
pub async fn livez() -> Json<Value> {
    Json(json!({}))
}

/// Readiness probe.
///
/// # Checks
///
/// - Database connectivity (executes simple query)
///
/// # Response
///
/// - **200 OK**: `{}`
/// - **500**: `{"postgres": "<error>"}` when the database cannot be reached
pub async fn readyz(State(pool): State<DbPool>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({}))),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"postgres": err.to_string()})),
            )
        }
    }
}
