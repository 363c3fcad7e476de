//! API handlers.
//!
//! The public surface serves neutral signals only: classification,
//! confidence, routing hints, evidence. No endpoint returns verdicts,
//! severities, recommendations, or alert levels; those belong to
//! downstream consumers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::errors::ApiError;
use crate::models::OmenSignal;
use crate::resilience::all_source_health;
use crate::state::{AppState, SourceSweepReport};

// =============================================================================
// HEALTH
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub sources: serde_json::Value,
    pub components: serde_json::Value,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let source_health = all_source_health();
    let unhealthy = source_health.iter().filter(|s| !s.healthy).count();

    let breakers: HashMap<String, serde_json::Value> =
        crate::resilience::circuit_breaker::all_circuit_breakers()
            .iter()
            .map(|cb| {
                (
                    cb.name().to_string(),
                    serde_json::to_value(cb.stats()).unwrap_or_default(),
                )
            })
            .collect();

    let status = if unhealthy == 0 {
        "healthy"
    } else if unhealthy < source_health.len() {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        sources: serde_json::to_value(&source_health).unwrap_or_default(),
        components: serde_json::json!({
            "ledger_partitions": state.ledger_reader.list_partitions().len(),
            "pipeline": state.pipeline.stats.snapshot(),
            "dlq_depth": state.pipeline.dlq().len(),
            "circuit_breakers": breakers,
            "ws_subscribers": state.broadcaster.subscriber_count(),
        }),
    })
}

// =============================================================================
// SIGNALS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub status: Option<String>,
    pub cursor: Option<i64>,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct SignalsPage {
    pub items: Vec<OmenSignal>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
}

pub async fn list_signals(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SignalsQuery>,
) -> Json<SignalsPage> {
    let limit = params.limit.min(500);
    let (items, has_more, cursor) =
        state
            .repository
            .page(limit, params.status.as_deref(), params.cursor);
    Json(SignalsPage {
        items,
        has_more,
        cursor,
    })
}

pub async fn get_signal(
    State(state): State<Arc<AppState>>,
    Path(signal_id): Path<String>,
) -> Response {
    match state.repository.get(&signal_id) {
        Some(signal) => Json(signal).into_response(),
        None => ApiError::not_found("Signal")
            .with_hint("Check the signal_id; sealed history is served from the ledger")
            .into_response(),
    }
}

// =============================================================================
// LIVE
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LiveGenerateResponse {
    pub success: bool,
    pub signals_created: usize,
    pub sources: HashMap<String, SourceSweepReport>,
    pub signal_ids: Vec<String>,
}

/// Trigger a fetch across all sources, end to end through the pipeline.
pub async fn live_generate(State(state): State<Arc<AppState>>) -> Response {
    let (reports, signal_ids) = state.fetch_and_process_all(10).await;
    let success = reports.iter().any(|r| r.status == "ok");
    let sources = reports
        .into_iter()
        .map(|r| (r.source.clone(), r))
        .collect();

    let body = LiveGenerateResponse {
        success,
        signals_created: signal_ids.len(),
        sources,
        signal_ids,
    };
    if success {
        Json(body).into_response()
    } else {
        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

pub async fn live_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.registry.live_mode_status()).unwrap_or_default())
}

// =============================================================================
// PARTNER SIGNALS
// =============================================================================

/// Partner view of an asset: confidence-scored exposure to recent signals
/// mentioning it. Strictly descriptive; consumers derive their own
/// decisions.
#[derive(Debug, Serialize)]
pub struct PartnerSignal {
    pub symbol: String,
    pub signal_count: usize,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub categories: Vec<String>,
    pub latest_signal_id: String,
    pub evidence: Vec<String>,
    pub as_of: String,
}

fn partner_signals_from(signals: &[OmenSignal]) -> Vec<PartnerSignal> {
    let mut by_symbol: HashMap<String, Vec<&OmenSignal>> = HashMap::new();
    for signal in signals {
        for asset in &signal.impact_hints.affected_asset_types {
            by_symbol.entry(asset.clone()).or_default().push(signal);
        }
    }

    let mut out: Vec<PartnerSignal> = by_symbol
        .into_iter()
        .map(|(symbol, group)| {
            let confidences: Vec<f64> = group.iter().map(|s| s.confidence_score).collect();
            let mut categories: Vec<String> = group
                .iter()
                .map(|s| s.category.as_str().to_string())
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();
            categories.sort();
            PartnerSignal {
                symbol,
                signal_count: group.len(),
                avg_confidence: confidences.iter().sum::<f64>() / confidences.len() as f64,
                max_confidence: confidences.iter().fold(0.0f64, |a, b| a.max(*b)),
                categories,
                latest_signal_id: group
                    .iter()
                    .max_by_key(|s| s.generated_at)
                    .map(|s| s.signal_id.clone())
                    .unwrap_or_default(),
                evidence: group
                    .iter()
                    .flat_map(|s| s.evidence.iter().map(|e| e.description.clone()))
                    .take(5)
                    .collect(),
                as_of: Utc::now().to_rfc3339(),
            }
        })
        .collect();
    out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    out
}

pub async fn partner_signals(State(state): State<Arc<AppState>>) -> Json<Vec<PartnerSignal>> {
    let recent = state.repository.recent(200);
    Json(partner_signals_from(&recent))
}

pub async fn partner_signal_for_symbol(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let recent = state.repository.recent(200);
    match partner_signals_from(&recent)
        .into_iter()
        .find(|p| p.symbol.eq_ignore_ascii_case(&symbol))
    {
        Some(partner) => Json(partner).into_response(),
        None => ApiError::not_found("Partner signal").into_response(),
    }
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ActivityEvent {
    pub event_type: String,
    pub target_id: String,
    pub description: String,
    pub source_type: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn activity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityQuery>,
) -> Response {
    match state.audit.recent(params.limit.min(200)) {
        Ok(records) => {
            let events: Vec<ActivityEvent> = records
                .into_iter()
                .map(|record| ActivityEvent {
                    event_type: match record.table_name.as_str() {
                        "signals" => "signal",
                        "validations" => "validation",
                        "rules" => "rule",
                        "alerts" => "alert",
                        "sources" => "source",
                        _ if record.operation_type == "DELETE" => "system",
                        _ => "system",
                    }
                    .to_string(),
                    target_id: record.target_id,
                    description: record.reason,
                    source_type: record.source_type,
                    timestamp: record.logged_at,
                })
                .collect();
            Json(events).into_response()
        }
        Err(err) => {
            ApiError::internal(&err.to_string(), state.config.is_production()).into_response()
        }
    }
}

// =============================================================================
// METRICS / DLQ / LEDGER
// =============================================================================

pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => ApiError::service_unavailable("metrics recorder not installed").into_response(),
    }
}

pub async fn ledger_partitions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.ledger_reader.list_partitions()).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct DlqReprocessQuery {
    #[serde(default = "default_dlq_items")]
    pub max_items: usize,
}

fn default_dlq_items() -> usize {
    25
}

pub async fn reprocess_dlq(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DlqReprocessQuery>,
) -> Json<serde_json::Value> {
    let (succeeded, requeued) = state.pipeline.reprocess_dlq(params.max_items).await;
    Json(serde_json::json!({
        "succeeded": succeeded,
        "requeued": requeued,
        "remaining": state.pipeline.dlq().len(),
    }))
}
