use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::state::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let keys_total = state.pool.len();
    let keys_available = state.pool.available_count();
    let status = if keys_available > 0 { "healthy" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "keys_total": keys_total,
        "keys_available": keys_available,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
