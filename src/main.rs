mod classify;
mod config;
mod error;
mod gemini;
mod greeting;
mod handlers;
mod key_pool;
mod metrics;
mod models;
mod state;

use clap::Parser; // for cli
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Args;
use crate::gemini::GeminiClient;
use crate::key_pool::KeyPool;
use crate::state::AppState;

// this is main async function with tokio
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // parse cli arguments
    let args = Args::parse();

    let pool = KeyPool::new(args.keys(), args.cooldown_policy());
    let client = GeminiClient::new(&args.upstream, args.upstream_timeout())?;

    let state = Arc::new(AppState {
        pool,
        client,
        text_model: args.text_model.clone(),
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, "Gateway running");
    info!(upstream = %args.upstream, text_model = %args.text_model, "Forwarding to Gemini");
    let policy = args.cooldown_policy();
    info!(
        quota_cooldown_secs = policy.quota.as_secs(),
        rate_limit_cooldown_secs = policy.rate_limit.as_secs(),
        max_wait_secs = policy.max_wait.as_secs(),
        "Key cooldown policy"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
