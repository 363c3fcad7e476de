//! Request logging.
//!
//! Every request gets a request id (propagated from `X-Request-Id` or
//! generated) that also lands in error envelopes, plus a structured log
//! line with method, path, status, and latency.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_logging(mut request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    // Health checks poll frequently; keep them out of the logs.
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let mut response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if status >= 500 {
        warn!(%method, path, status, latency_ms, request_id, "request failed");
    } else {
        info!(%method, path, status, latency_ms, request_id, "request completed");
    }
    response
}
