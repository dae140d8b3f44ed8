use axum::{Json, extract::State, http::StatusCode};
use std::sync::Arc;
use std::time::Instant;

use crate::greeting;
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::{
    BackgroundRequest, Greeting, ImageResponse, LetterRequest, MagicLetter, StickerRequest,
};
use crate::state::AppState;

type HandlerError = (StatusCode, String);

// Blank names never reach the model
fn require_name(name: &str) -> Result<&str, HandlerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "name is required".to_string()));
    }
    Ok(name)
}

// Counts the request and records its latency once it completes
struct Timer(Instant);

impl Timer {
    fn start() -> Self {
        REQUEST_TOTAL.inc();
        Timer(Instant::now())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        REQUEST_LATENCY.observe(self.0.elapsed().as_secs_f64());
    }
}

pub async fn letter_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LetterRequest>,
) -> Result<Json<MagicLetter>, HandlerError> {
    let _timer = Timer::start();
    let name = require_name(&payload.name)?;

    let letter = greeting::generate_magic_letter(&state, name, payload.image.as_deref()).await;
    Ok(Json(letter))
}

pub async fn sticker_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StickerRequest>,
) -> Result<Json<ImageResponse>, HandlerError> {
    let _timer = Timer::start();
    let name = require_name(&payload.name)?;

    let image = greeting::generate_elf_sticker(&state, name, &payload.image).await;
    Ok(Json(ImageResponse { image }))
}

pub async fn background_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BackgroundRequest>,
) -> Result<Json<ImageResponse>, HandlerError> {
    let _timer = Timer::start();
    let name = require_name(&payload.name)?;

    let image = greeting::generate_background(&state, name).await;
    Ok(Json(ImageResponse { image }))
}

pub async fn greeting_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LetterRequest>,
) -> Result<Json<Greeting>, HandlerError> {
    let _timer = Timer::start();
    let name = require_name(&payload.name)?;

    let greeting = greeting::generate_greeting(&state, name, payload.image.as_deref()).await;
    Ok(Json(greeting))
}
