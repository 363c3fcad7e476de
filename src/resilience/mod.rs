//! Resilience primitives
//!
//! Circuit breaker with three states and sliding-window failure-rate trip,
//! retry with exponential backoff, and per-source health tracking. Every
//! adapter wraps its outbound I/O with these.

pub mod circuit_breaker;
pub mod health;
pub mod retry;

pub use circuit_breaker::{
    get_circuit_breaker, register_circuit_breaker, reset_circuit_registry, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use health::{
    all_source_health, get_source_health, reset_health_registry, SourceHealth, SourceHealthSnapshot,
};
pub use retry::RetryPolicy;
