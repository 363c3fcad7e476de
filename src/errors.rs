//! Error taxonomy
//!
//! Kinds, not just types: adapters and the pipeline wrap every known
//! failure into one of these so raw underlying errors never leak to API
//! clients in production. The ledger path is NOT best-effort: a ledger
//! failure is terminal for that emit. The audit path IS best-effort.

use thiserror::Error;

/// Missing or invalid mandatory configuration. Fatal at startup.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// A source refused, timed out, or returned garbage. Recoverable; the
/// circuit breaker absorbs repeated occurrences.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("source '{source_name}' timed out after {timeout_secs}s")]
    Timeout { source_name: String, timeout_secs: u64 },

    #[error("source '{source_name}' returned HTTP {status}")]
    Http { source_name: String, status: u16 },

    #[error("source '{source_name}' payload decode failed: {reason}")]
    Decode { source_name: String, reason: String },

    #[error("circuit '{name}' is OPEN, retry after {retry_after_secs:.1}s")]
    CircuitOpen { name: String, retry_after_secs: f64 },

    #[error("source '{source_name}' is not configured")]
    NotConfigured { source_name: String },
}

impl AdapterError {
    /// Retry only makes sense for transient failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Timeout { .. } | AdapterError::Unavailable { .. } => true,
            AdapterError::Http { status, .. } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            _ => false,
        }
    }
}

/// A validation rule raised; the event is routed to the DLQ with the rule
/// name annotated.
#[derive(Debug, Error)]
#[error("validation rule '{rule_name}' failed: {reason}")]
pub struct ValidationRuleError {
    pub rule_name: String,
    pub reason: String,
}

/// Enrichment or classification failure; DLQ.
#[derive(Debug, Error)]
#[error("translation failed: {0}")]
pub struct TranslationRuleError(pub String);

/// Ledger persistence failure. On emit this produces status FAILED and no
/// hot push is attempted.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger write failed: {0}")]
    Write(String),

    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    #[error("partition is sealed: {0}")]
    PartitionSealed(String),

    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hot-path delivery failure. Swallowed into LEDGER_ONLY; reconcile replays.
#[derive(Debug, Error)]
#[error("hot path delivery failed: {0}")]
pub struct HotPathError(pub String);

/// Downstream already holds this signal id (409). Treated as success.
#[derive(Debug, Error)]
#[error("duplicate signal: {signal_id}")]
pub struct DuplicateSignal {
    pub signal_id: String,
    pub ack_id: Option<String>,
}

/// Error kinds recorded on DLQ entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    ValidationRejected,
    ValidationRuleError,
    TranslationRuleError,
    AdapterCancelled,
    PersistenceError,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::ValidationRejected => "validation_rejected",
            PipelineErrorKind::ValidationRuleError => "validation_rule_error",
            PipelineErrorKind::TranslationRuleError => "translation_rule_error",
            PipelineErrorKind::AdapterCancelled => "adapter_cancelled",
            PipelineErrorKind::PersistenceError => "persistence_error",
        }
    }
}
