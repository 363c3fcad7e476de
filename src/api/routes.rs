//! Router assembly.
//!
//! Public endpoints: /health, /metrics, /ws. Everything else sits behind
//! the X-API-Key middleware (when keys are configured) and the per-caller
//! rate limiter.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::{handlers, ws};
use crate::middleware::{
    api_key_middleware, rate_limit_middleware, request_logging, ApiKeyManager, RateLimitConfig,
    RateLimiter,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_keys = Arc::new(ApiKeyManager::new(
        &state.config.api_keys,
        state.config.api_key_pepper.as_deref(),
    ));
    let limiter = RateLimiter::new(RateLimitConfig {
        requests_per_minute: state.config.rate_limit_rpm,
        burst: state.config.rate_limit_burst,
    });

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/ws", get(ws::ws_handler))
        .route("/activity", get(handlers::activity))
        .route("/api/v1/signals", get(handlers::list_signals))
        .route("/api/v1/signals/:signal_id", get(handlers::get_signal))
        .route("/api/v1/live/generate", post(handlers::live_generate))
        .route("/api/v1/live/status", get(handlers::live_status))
        .route("/api/v1/partner-signals", get(handlers::partner_signals))
        .route(
            "/api/v1/partner-signals/:symbol",
            get(handlers::partner_signal_for_symbol),
        )
        .route("/api/v1/ledger/partitions", get(handlers::ledger_partitions))
        .route("/api/v1/dlq/reprocess", post(handlers::reprocess_dlq))
        .layer(axum_mw::from_fn_with_state(api_keys, api_key_middleware))
        .layer(axum_mw::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(axum_mw::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
