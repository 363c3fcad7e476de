//! Circuit breaker
//!
//! States: CLOSED (normal), OPEN (fail fast), HALF_OPEN (probing).
//!
//! Transitions:
//! - CLOSED -> OPEN on consecutive failures >= failure_threshold, or when
//!   the sliding window holds >= min_calls_in_window calls with a failure
//!   rate >= failure_rate_threshold
//! - OPEN -> HALF_OPEN after timeout_seconds
//! - HALF_OPEN -> CLOSED after success_threshold consecutive successes
//! - HALF_OPEN -> OPEN on any failure
//!
//! All state transitions are serialized by a mutex; the guarded call itself
//! runs outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::errors::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub half_open_max_calls: u32,
    pub window_size: Duration,
    pub failure_rate_threshold: f64,
    pub min_calls_in_window: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            window_size: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            min_calls_in_window: 10,
        }
    }
}

/// Snapshot for monitoring and the health API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub state: String,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    call_results: Vec<(Instant, bool)>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission token returned by `begin_call`. Dropping it without recording
/// an outcome leaks a half-open slot, so callers must always record.
pub struct CallPermit {
    half_open: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_calls: 0,
                call_results: Vec::new(),
                total_calls: 0,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state.to_string(),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
        }
    }

    /// Admit or reject a call. On rejection returns `CircuitOpen` with the
    /// remaining retry-after.
    pub fn begin_call(&self) -> Result<CallPermit, AdapterError> {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        self.check_state_transition(&mut inner);

        match inner.state {
            CircuitState::Open => {
                inner.total_rejected += 1;
                Err(AdapterError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after_secs: self.retry_after(&inner),
                })
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    inner.total_rejected += 1;
                    return Err(AdapterError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after_secs: 1.0,
                    });
                }
                inner.half_open_calls += 1;
                Ok(CallPermit { half_open: true })
            }
            CircuitState::Closed => Ok(CallPermit { half_open: false }),
        }
    }

    pub fn record_success(&self, permit: CallPermit) {
        let mut inner = self.inner.lock();
        if permit.half_open {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
        inner.consecutive_successes += 1;
        inner.consecutive_failures = 0;
        inner.total_successes += 1;
        inner.call_results.push((Instant::now(), true));

        if inner.state == CircuitState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self, permit: CallPermit) {
        let mut inner = self.inner.lock();
        if permit.half_open {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
        inner.consecutive_failures += 1;
        inner.consecutive_successes = 0;
        inner.total_failures += 1;
        inner.call_results.push((Instant::now(), false));

        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit hit consecutive failure threshold, opening"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run an async operation through the breaker. The future executes
    /// outside the state lock.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<Result<T, E>, AdapterError>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.begin_call()?;
        let result = fut.await;
        match &result {
            Ok(_) => self.record_success(permit),
            Err(_) => self.record_failure(permit),
        }
        Ok(result)
    }

    /// Manual reset to CLOSED (e.g. after confirming the service is back).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(circuit = %self.name, "circuit manually reset");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
        inner.half_open_calls = 0;
        inner.call_results.clear();
    }

    fn check_state_transition(&self, inner: &mut Inner) {
        match inner.state {
            CircuitState::Open => {
                if let Some(opened_at) = inner.opened_at {
                    if opened_at.elapsed() >= self.config.timeout {
                        self.transition(inner, CircuitState::HalfOpen);
                    }
                }
            }
            CircuitState::Closed => {
                let cutoff = Instant::now() - self.config.window_size;
                inner.call_results.retain(|(t, _)| *t > cutoff);
                if inner.call_results.len() >= self.config.min_calls_in_window {
                    let failures =
                        inner.call_results.iter().filter(|(_, ok)| !*ok).count() as f64;
                    let rate = failures / inner.call_results.len() as f64;
                    if rate >= self.config.failure_rate_threshold {
                        warn!(
                            circuit = %self.name,
                            failure_rate_pct = rate * 100.0,
                            "circuit failure rate exceeds threshold, opening"
                        );
                        self.transition(inner, CircuitState::Open);
                    }
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, new_state: CircuitState) {
        let old = inner.state;
        inner.state = new_state;
        info!(circuit = %self.name, from = %old, to = %new_state, "circuit state transition");

        match new_state {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::HalfOpen => {
                inner.half_open_calls = 0;
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.opened_at = None;
            }
        }
    }

    fn retry_after(&self, inner: &Inner) -> f64 {
        match inner.opened_at {
            Some(opened_at) => {
                (self.config.timeout.as_secs_f64() - opened_at.elapsed().as_secs_f64()).max(0.0)
            }
            None => self.config.timeout.as_secs_f64(),
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

lazy_static! {
    static ref CIRCUIT_REGISTRY: RwLock<HashMap<String, Arc<CircuitBreaker>>> =
        RwLock::new(HashMap::new());
}

/// Register a breaker for metrics and API exposure. Returns the registered
/// instance (an existing one wins so all callers share state).
pub fn register_circuit_breaker(name: &str, breaker: Arc<CircuitBreaker>) -> Arc<CircuitBreaker> {
    let mut registry = CIRCUIT_REGISTRY.write();
    registry
        .entry(name.to_string())
        .or_insert(breaker)
        .clone()
}

pub fn get_circuit_breaker(name: &str) -> Option<Arc<CircuitBreaker>> {
    CIRCUIT_REGISTRY.read().get(name).cloned()
}

pub fn all_circuit_breakers() -> Vec<Arc<CircuitBreaker>> {
    CIRCUIT_REGISTRY.read().values().cloned().collect()
}

/// Test hook: drop all registered breakers.
pub fn reset_circuit_registry() {
    CIRCUIT_REGISTRY.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(50),
            half_open_max_calls: 2,
            window_size: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            min_calls_in_window: 100, // keep the rate trip out of these tests
        }
    }

    fn fail_once(cb: &CircuitBreaker) {
        let permit = cb.begin_call().unwrap();
        cb.record_failure(permit);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", fast_config());
        fail_once(&cb);
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail_once(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.begin_call();
        assert!(matches!(
            rejected,
            Err(AdapterError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_successes() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail_once(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        let permit = cb.begin_call().expect("probe admitted after timeout");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success(permit);

        let permit = cb.begin_call().unwrap();
        cb.record_success(permit);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail_once(&cb);
        }
        std::thread::sleep(Duration::from_millis(60));
        let permit = cb.begin_call().unwrap();
        cb.record_failure(permit);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_caps_concurrent_probes() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            fail_once(&cb);
        }
        std::thread::sleep(Duration::from_millis(60));

        let p1 = cb.begin_call().unwrap();
        let _p2 = cb.begin_call().unwrap();
        // Third concurrent probe exceeds half_open_max_calls.
        assert!(cb.begin_call().is_err());
        cb.record_success(p1);
        // Slot freed; another probe is admitted.
        assert!(cb.begin_call().is_ok());
    }

    #[test]
    fn sliding_window_failure_rate_trips() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100, // only the window can trip here
            min_calls_in_window: 10,
            ..fast_config()
        };
        let cb = CircuitBreaker::new("test", config);
        for i in 0..10 {
            let permit = cb.begin_call().unwrap();
            if i % 2 == 0 {
                cb.record_failure(permit);
            } else {
                cb.record_success(permit);
            }
        }
        // 50% failure rate over 10 calls >= threshold; next admission trips.
        assert!(cb.begin_call().is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn call_wraps_future_outcomes() {
        let cb = CircuitBreaker::new("test", fast_config());
        let ok: Result<Result<u32, &str>, _> = cb.call(async { Ok(7) }).await;
        assert_eq!(ok.unwrap().unwrap(), 7);

        for _ in 0..3 {
            let _ = cb.call(async { Err::<u32, &str>("boom") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.call(async { Ok::<u32, &str>(1) }).await.is_err());
    }

    #[test]
    fn registry_shares_instances() {
        reset_circuit_registry();
        let a = register_circuit_breaker(
            "shared",
            Arc::new(CircuitBreaker::new("shared", fast_config())),
        );
        let b = register_circuit_breaker(
            "shared",
            Arc::new(CircuitBreaker::new("shared", fast_config())),
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert!(get_circuit_breaker("shared").is_some());
        reset_circuit_registry();
        assert!(get_circuit_breaker("shared").is_none());
    }
}
