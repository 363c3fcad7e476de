//! Rate limiting.
//!
//! In-memory fixed-window limiter keyed by API key when present, client
//! IP otherwise. Limits come from RATE_LIMIT_RPM / RATE_LIMIT_BURST.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::api::errors::ApiError;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 120,
            burst: 20,
        }
    }
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, WindowEntry>>>,
}

enum Decision {
    Allowed,
    Exceeded { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, key: &str) -> Decision {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= Duration::from_secs(60) {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;

        let limit = self.config.requests_per_minute + self.config.burst;
        if entry.count > limit {
            Decision::Exceeded {
                retry_after: entry.window_start + Duration::from_secs(60) - now,
            }
        } else {
            Decision::Allowed
        }
    }

    /// Drop stale windows; call from a background task.
    pub fn cleanup(&self) {
        let mut windows = self.windows.lock();
        let now = Instant::now();
        windows.retain(|_, entry| now.duration_since(entry.window_start) < Duration::from_secs(120));
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Keyed clients are limited per key so one tenant cannot starve the
    // others behind a shared proxy IP.
    let key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|k| format!("key:{}", k))
        .unwrap_or_else(|| format!("ip:{}", addr.ip()));

    match limiter.check(&key) {
        Decision::Allowed => next.run(request).await,
        Decision::Exceeded { retry_after } => {
            warn!(client = %key, retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
            let mut response = ApiError::rate_limited(retry_after.as_secs()).into_response();
            if let Ok(value) =
                axum::http::HeaderValue::from_str(&retry_after.as_secs().to_string())
            {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_plus_burst() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 5,
            burst: 2,
        });
        for _ in 0..7 {
            assert!(matches!(limiter.check("key:a"), Decision::Allowed));
        }
        assert!(matches!(
            limiter.check("key:a"),
            Decision::Exceeded { .. }
        ));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            burst: 0,
        });
        assert!(matches!(limiter.check("key:a"), Decision::Allowed));
        assert!(matches!(limiter.check("key:a"), Decision::Exceeded { .. }));
        assert!(matches!(limiter.check("ip:1.2.3.4"), Decision::Allowed));
    }

    #[test]
    fn cleanup_retains_recent_windows() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.check("key:a");
        limiter.cleanup();
        assert_eq!(limiter.windows.lock().len(), 1);
    }
}
