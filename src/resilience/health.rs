//! Per-source health tracking.
//!
//! A source goes unhealthy after 3 consecutive failures and recovers on the
//! next success. Snapshots feed the /health endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

const UNHEALTHY_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceHealthSnapshot {
    pub source: String,
    pub healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub failure_rate_pct: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug)]
struct HealthInner {
    healthy: bool,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
    total_requests: u64,
    total_failures: u64,
    total_latency_ms: f64,
}

#[derive(Debug)]
pub struct SourceHealth {
    source_name: String,
    inner: Mutex<HealthInner>,
}

impl SourceHealth {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            inner: Mutex::new(HealthInner {
                healthy: true,
                last_success: None,
                last_failure: None,
                last_error: None,
                consecutive_failures: 0,
                total_requests: 0,
                total_failures: 0,
                total_latency_ms: 0.0,
            }),
        }
    }

    pub fn record_success(&self, latency_ms: f64) {
        let mut inner = self.inner.lock();
        inner.healthy = true;
        inner.last_success = Some(Utc::now());
        inner.consecutive_failures = 0;
        inner.total_requests += 1;
        inner.total_latency_ms += latency_ms;
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Utc::now());
        inner.last_error = Some(error.into());
        inner.consecutive_failures += 1;
        inner.total_requests += 1;
        inner.total_failures += 1;
        if inner.consecutive_failures >= UNHEALTHY_AFTER_CONSECUTIVE_FAILURES {
            inner.healthy = false;
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.lock().healthy
    }

    pub fn snapshot(&self) -> SourceHealthSnapshot {
        let inner = self.inner.lock();
        let successes = inner.total_requests - inner.total_failures;
        let avg_latency_ms = if successes == 0 {
            0.0
        } else {
            inner.total_latency_ms / successes as f64
        };
        let failure_rate_pct = if inner.total_requests == 0 {
            0.0
        } else {
            (inner.total_failures as f64 / inner.total_requests as f64) * 100.0
        };
        SourceHealthSnapshot {
            source: self.source_name.clone(),
            healthy: inner.healthy,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            last_error: inner.last_error.clone(),
            consecutive_failures: inner.consecutive_failures,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            failure_rate_pct: (failure_rate_pct * 100.0).round() / 100.0,
            avg_latency_ms: (avg_latency_ms * 100.0).round() / 100.0,
        }
    }
}

lazy_static! {
    static ref HEALTH_REGISTRY: RwLock<HashMap<String, Arc<SourceHealth>>> =
        RwLock::new(HashMap::new());
}

/// Get or create the health tracker for a source.
pub fn get_source_health(source_name: &str) -> Arc<SourceHealth> {
    if let Some(health) = HEALTH_REGISTRY.read().get(source_name) {
        return health.clone();
    }
    let mut registry = HEALTH_REGISTRY.write();
    registry
        .entry(source_name.to_string())
        .or_insert_with(|| Arc::new(SourceHealth::new(source_name)))
        .clone()
}

pub fn all_source_health() -> Vec<SourceHealthSnapshot> {
    let mut snapshots: Vec<SourceHealthSnapshot> = HEALTH_REGISTRY
        .read()
        .values()
        .map(|h| h.snapshot())
        .collect();
    snapshots.sort_by(|a, b| a.source.cmp(&b.source));
    snapshots
}

/// Test hook: drop all trackers.
pub fn reset_health_registry() {
    HEALTH_REGISTRY.write().clear();
}
