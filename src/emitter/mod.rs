//! Dual-path signal emitter.
//!
//! CRITICAL INVARIANT: a signal MUST be written to the ledger before any
//! hot-path push. A ledger failure returns FAILED and nothing is pushed;
//! a hot-path failure degrades to LEDGER_ONLY and a reconcile pass can
//! always recover from the ledger. Delivery to the downstream is
//! at-least-once, made safe by the idempotency key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AdapterError, LedgerError};
use crate::ledger::LedgerWriter;
use crate::models::{generate_input_event_hash, OmenSignal, RawEvent, SignalEvent};
use crate::pipeline::EmitPort;
use crate::realtime::Broadcaster;
use crate::resilience::{
    register_circuit_breaker, CircuitBreaker, CircuitBreakerConfig,
};

pub const CIRCUIT_NAME_RISKCAST: &str = "riskcast_hot_path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitStatus {
    /// Ledger + hot path both succeeded.
    Delivered,
    /// Ledger succeeded, hot path did not; reconcile must replay.
    LedgerOnly,
    /// Downstream already has this signal id.
    Duplicate,
    /// Ledger write failed; nothing was pushed.
    Failed,
}

impl EmitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitStatus::Delivered => "delivered",
            EmitStatus::LedgerOnly => "ledger_only",
            EmitStatus::Duplicate => "duplicate",
            EmitStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmitResult {
    pub status: EmitStatus,
    pub signal_id: String,
    pub ledger_partition: Option<String>,
    pub ack_id: Option<String>,
    pub error: Option<String>,
}

/// Retry settings for the hot-path POST.
#[derive(Debug, Clone)]
pub struct EmitterRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for EmitterRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

const RETRYABLE_STATUS: &[u16] = &[408, 429, 500, 502, 503, 504];

// =============================================================================
// BACKPRESSURE
// =============================================================================

/// Slows emission when the downstream cannot keep up: after `threshold`
/// consecutive failures, every emit waits out a sleep window of
/// min(max_backoff, 2^consecutive_failures) seconds.
pub struct BackpressureController {
    threshold: u32,
    max_backoff_secs: u64,
    state: Mutex<BackpressureState>,
}

struct BackpressureState {
    consecutive_failures: u32,
    backoff_until: Option<DateTime<Utc>>,
}

impl BackpressureController {
    pub fn new(threshold: u32, max_backoff_secs: u64) -> Self {
        Self {
            threshold,
            max_backoff_secs,
            state: Mutex::new(BackpressureState {
                consecutive_failures: 0,
                backoff_until: None,
            }),
        }
    }

    pub async fn wait_if_needed(&self) {
        let wait = {
            let state = self.state.lock();
            state.backoff_until.and_then(|until| {
                let now = Utc::now();
                if now < until {
                    Some((until - now).to_std().unwrap_or_default())
                } else {
                    None
                }
            })
        };
        if let Some(wait) = wait {
            warn!(wait_secs = wait.as_secs_f64(), "backpressure: waiting");
            tokio::time::sleep(wait).await;
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.backoff_until = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            let backoff = self
                .max_backoff_secs
                .min(2u64.saturating_pow(state.consecutive_failures));
            state.backoff_until = Some(Utc::now() + chrono::Duration::seconds(backoff as i64));
            warn!(backoff_secs = backoff, "entering backpressure");
        }
    }

    pub fn is_backed_off(&self) -> bool {
        self.state
            .lock()
            .backoff_until
            .map(|until| Utc::now() < until)
            .unwrap_or(false)
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(5, 60)
    }
}

// =============================================================================
// EMITTER
// =============================================================================

enum PushOutcome {
    Delivered(String),
    Duplicate(Option<String>),
}

pub struct SignalEmitter {
    ledger: Arc<LedgerWriter>,
    riskcast_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: EmitterRetryConfig,
    backpressure: BackpressureController,
    circuit_breaker: Arc<CircuitBreaker>,
    broadcaster: Option<Arc<Broadcaster>>,
    /// When false, evidence chains are stripped from hot-path payloads
    /// (the ledger record always keeps them).
    explanations_hot_path: bool,
}

impl SignalEmitter {
    pub fn new(
        ledger: Arc<LedgerWriter>,
        riskcast_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let circuit_breaker = register_circuit_breaker(
            CIRCUIT_NAME_RISKCAST,
            Arc::new(CircuitBreaker::new(
                CIRCUIT_NAME_RISKCAST,
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    success_threshold: 3,
                    timeout: Duration::from_secs(30),
                    ..Default::default()
                },
            )),
        );
        Self {
            ledger,
            riskcast_url: riskcast_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            retry: EmitterRetryConfig::default(),
            backpressure: BackpressureController::default(),
            circuit_breaker,
            broadcaster: None,
            explanations_hot_path: true,
        }
    }

    pub fn with_explanations_hot_path(mut self, enabled: bool) -> Self {
        self.explanations_hot_path = enabled;
        self
    }

    pub fn with_retry_config(mut self, retry: EmitterRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_backpressure(mut self, threshold: u32, max_backoff_secs: u64) -> Self {
        self.backpressure = BackpressureController::new(threshold, max_backoff_secs);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn backpressure(&self) -> &BackpressureController {
        &self.backpressure
    }

    /// Emit a signal via the dual path.
    pub async fn emit(
        &self,
        signal: &OmenSignal,
        input_event: &RawEvent,
        observed_at: DateTime<Utc>,
    ) -> EmitResult {
        let input_hash = generate_input_event_hash(input_event);
        let event =
            SignalEvent::from_omen_signal(signal.clone(), input_hash, observed_at);

        // === STEP 1: ledger write (MUST succeed before any push) ===
        let event = match self.ledger.write(event) {
            Ok(event) => {
                info!(
                    signal_id = %event.signal_id,
                    partition = event.ledger_partition.as_deref().unwrap_or("?"),
                    "ledger write OK"
                );
                event
            }
            Err(err) => {
                warn!(signal_id = %signal.signal_id, error = %err, "ledger write FAILED");
                let result = EmitResult {
                    status: EmitStatus::Failed,
                    signal_id: signal.signal_id.clone(),
                    ledger_partition: None,
                    ack_id: None,
                    error: Some(err.to_string()),
                };
                self.broadcast(signal, &result);
                return result;
            }
        };

        // === STEP 2: hot push (best effort) through the circuit breaker ===
        self.backpressure.wait_if_needed().await;

        let result = match self.circuit_breaker.begin_call() {
            Err(AdapterError::CircuitOpen {
                retry_after_secs, ..
            }) => {
                warn!(
                    signal_id = %event.signal_id,
                    retry_after = retry_after_secs,
                    "circuit open, returning LEDGER_ONLY"
                );
                EmitResult {
                    status: EmitStatus::LedgerOnly,
                    signal_id: event.signal_id.clone(),
                    ledger_partition: event.ledger_partition.clone(),
                    ack_id: None,
                    error: Some(format!(
                        "Circuit open, retry after {:.1}s",
                        retry_after_secs
                    )),
                }
            }
            Err(other) => EmitResult {
                status: EmitStatus::LedgerOnly,
                signal_id: event.signal_id.clone(),
                ledger_partition: event.ledger_partition.clone(),
                ack_id: None,
                error: Some(other.to_string()),
            },
            Ok(permit) => match self.push_to_riskcast(&event).await {
                Ok(PushOutcome::Delivered(ack_id)) => {
                    self.circuit_breaker.record_success(permit);
                    self.backpressure.record_success();
                    EmitResult {
                        status: EmitStatus::Delivered,
                        signal_id: event.signal_id.clone(),
                        ledger_partition: event.ledger_partition.clone(),
                        ack_id: Some(ack_id),
                        error: None,
                    }
                }
                // 409 means the downstream already holds the id; the
                // breaker counts it as a success.
                Ok(PushOutcome::Duplicate(ack_id)) => {
                    self.circuit_breaker.record_success(permit);
                    self.backpressure.record_success();
                    info!(signal_id = %event.signal_id, "duplicate signal, already processed");
                    EmitResult {
                        status: EmitStatus::Duplicate,
                        signal_id: event.signal_id.clone(),
                        ledger_partition: event.ledger_partition.clone(),
                        ack_id,
                        error: None,
                    }
                }
                Err(err) => {
                    self.circuit_breaker.record_failure(permit);
                    self.backpressure.record_failure();
                    warn!(signal_id = %event.signal_id, error = %err, "hot path failed, will reconcile");
                    EmitResult {
                        status: EmitStatus::LedgerOnly,
                        signal_id: event.signal_id.clone(),
                        ledger_partition: event.ledger_partition.clone(),
                        ack_id: None,
                        error: Some(err),
                    }
                }
            },
        };

        metrics::increment_counter!(
            "omen_signals_emitted_total",
            "status" => result.status.as_str(),
            "category" => signal.category.as_str()
        );
        self.broadcast(signal, &result);
        result
    }

    /// Idempotent POST with bounded retries on 408/429/5xx and transport
    /// errors. 200 delivers, 409 is a duplicate, anything else fails.
    async fn push_to_riskcast(&self, event: &SignalEvent) -> Result<PushOutcome, String> {
        let url = format!("{}/api/v1/signals/ingest", self.riskcast_url);
        let body = if self.explanations_hot_path {
            serde_json::to_string(event).map_err(|e| e.to_string())?
        } else {
            let mut lean = event.clone();
            lean.signal.evidence.clear();
            serde_json::to_string(&lean).map_err(|e| e.to_string())?
        };
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay_ms = ((self.retry.base_delay_ms as f64)
                    * self.retry.backoff_multiplier.powi(attempt as i32 - 1))
                .min(self.retry.max_delay_ms as f64);
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .header("X-Idempotency-Key", &event.signal_id)
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status == 200 {
                        let ack_id = response
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| v["ack_id"].as_str().map(String::from))
                            .unwrap_or_else(|| "unknown".to_string());
                        return Ok(PushOutcome::Delivered(ack_id));
                    }
                    if status == 409 {
                        let ack_id = response
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| v["ack_id"].as_str().map(String::from));
                        return Ok(PushOutcome::Duplicate(ack_id));
                    }
                    let text = response.text().await.unwrap_or_default();
                    let snippet: String = text.chars().take(200).collect();
                    if RETRYABLE_STATUS.contains(&status) {
                        last_error = format!("HTTP {}: {}", status, snippet);
                        continue;
                    }
                    return Err(format!("HTTP {}: {}", status, snippet));
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }
        }
        Err(format!("Max retries exceeded: {}", last_error))
    }

    /// Replay LEDGER_ONLY events from a partition through the idempotent
    /// push. Downstream 409s confirm prior delivery and count as success.
    pub async fn reconcile(
        &self,
        reader: &crate::ledger::LedgerReader,
        partition: &str,
        max_items: usize,
    ) -> Result<(usize, usize), LedgerError> {
        let events = reader.read_partition(partition, true, true)?;
        let mut delivered = 0;
        let mut failed = 0;

        for event in events.into_iter().take(max_items) {
            match self.circuit_breaker.begin_call() {
                Err(_) => {
                    failed += 1;
                    break;
                }
                Ok(permit) => match self.push_to_riskcast(&event).await {
                    Ok(_) => {
                        self.circuit_breaker.record_success(permit);
                        delivered += 1;
                    }
                    Err(_) => {
                        self.circuit_breaker.record_failure(permit);
                        failed += 1;
                    }
                },
            }
        }
        info!(partition, delivered, failed, "reconcile pass complete");
        Ok((delivered, failed))
    }

    /// Broadcast never affects the emit result.
    fn broadcast(&self, signal: &OmenSignal, result: &EmitResult) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_signal_emitted(
                &result.signal_id,
                &signal.title,
                signal.category.as_str(),
                result.status.as_str(),
            );
        }
    }

    /// Graceful-shutdown hook: reqwest clients close on drop, so this is
    /// informational only.
    pub fn close(&self) {
        info!("signal emitter closed");
    }
}

#[async_trait]
impl EmitPort for SignalEmitter {
    async fn emit(&self, signal: &OmenSignal, input_event: &RawEvent) -> EmitResult {
        SignalEmitter::emit(self, signal, input_event, input_event.observed_at).await
    }
}
