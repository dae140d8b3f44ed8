mod generate;
mod health;
mod metrics;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::state::AppState;

pub use generate::{background_handler, greeting_handler, letter_handler, sticker_handler};
pub use health::health_handler;
pub use metrics::metrics_handler;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/letter", post(letter_handler))
        .route("/api/sticker", post(sticker_handler))
        .route("/api/background", post(background_handler))
        .route("/api/greeting", post(greeting_handler))
        .with_state(state)
}
