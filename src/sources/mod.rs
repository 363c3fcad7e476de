//! Source adapters.
//!
//! Each configured source implements one uniform capability: fetch a batch
//! of RawEvents, answer a health check, and report whether it is actually
//! configured. Adapters wrap their outbound I/O with a per-source circuit
//! breaker and retry policy and feed the global health tracker; the
//! registry classifies each one REAL, MOCK, or DISABLED and gates live
//! mode.

pub mod ais;
pub mod commodity;
pub mod freight;
pub mod news;
pub mod polymarket;
pub mod registry;
pub mod stock;
pub mod weather;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::AdapterError;
use crate::models::{RawEvent, Source};
use crate::resilience::{
    get_source_health, register_circuit_breaker, CircuitBreaker, CircuitBreakerConfig,
    RetryPolicy,
};

pub use registry::{SourceInfo, SourceRegistry, SourceType};

/// Adapter-reported health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub status: HealthState,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl AdapterHealth {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            status: HealthState::Healthy,
            latency_ms,
            error: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn unhealthy(latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            latency_ms,
            error: Some(error.into()),
            metadata: serde_json::json!({}),
        }
    }
}

/// Uniform adapter capability.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;
    fn is_configured(&self) -> bool;
    async fn fetch_events(&self, limit: usize) -> Result<Vec<RawEvent>, AdapterError>;
    async fn health_check(&self) -> AdapterHealth;
}

/// Per-source resilience bundle shared by every adapter: circuit breaker,
/// retry policy, and health tracking around one outbound operation.
pub struct SourceGuard {
    source: Source,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl SourceGuard {
    pub fn new(source: Source) -> Self {
        let breaker = register_circuit_breaker(
            source.as_str(),
            Arc::new(CircuitBreaker::new(
                source.as_str(),
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    success_threshold: 2,
                    timeout: Duration::from_secs(30),
                    ..Default::default()
                },
            )),
        );
        Self {
            source,
            breaker,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run an outbound operation through breaker + retry, recording
    /// latency and failures on the global health tracker.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, AdapterError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, AdapterError>>,
    {
        let health = get_source_health(self.source.as_str());
        let permit = self.breaker.begin_call().map_err(|err| {
            health.record_failure(err.to_string());
            err
        })?;

        let start = Instant::now();
        let result = self
            .retry
            .run(&op, |err: &AdapterError| err.is_retryable())
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => {
                self.breaker.record_success(permit);
                health.record_success(latency_ms);
            }
            Err(err) => {
                self.breaker.record_failure(permit);
                health.record_failure(err.to_string());
            }
        }
        result
    }
}

/// Shared HTTP client settings for real providers.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}
