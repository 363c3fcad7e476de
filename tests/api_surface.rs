//! HTTP surface contracts: auth, error envelope, pagination shape, and
//! the forbidden-field invariant on every signal-bearing endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use omen_engine::api::build_router;
use omen_engine::audit::{AuditOperation, AuditSourceType};
use omen_engine::emitter::{EmitResult, EmitStatus};
use omen_engine::models::*;
use omen_engine::pipeline::SignalStore;
use omen_engine::{AppState, OmenConfig};

const FORBIDDEN_FIELDS: &[&str] = &[
    "risk_status",
    "overall_risk",
    "risk_breakdown",
    "risk_level",
    "risk_score",
    "risk_verdict",
    "recommendation",
    "decision",
    "action_required",
    "alert_level",
];

struct TestServer {
    base_url: String,
    state: Arc<AppState>,
    _ledger_dir: tempfile::TempDir,
}

async fn spawn_server(api_keys: Vec<String>) -> TestServer {
    let ledger_dir = tempfile::tempdir().unwrap();
    let mut config = OmenConfig::from_env().unwrap();
    config.ledger_base_path = ledger_dir.path().to_path_buf();
    config.database_path = ":memory:".to_string();
    config.api_keys = api_keys;
    config.api_key_pepper = Some("test-pepper".to_string());
    // Point the hot path at a dead port; these tests never emit.
    config.riskcast_url = "http://127.0.0.1:1".to_string();

    let state = AppState::build(config).unwrap();
    let router = build_router(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        state,
        _ledger_dir: ledger_dir,
    }
}

fn seeded_signal(id: &str, assets: &[&str]) -> OmenSignal {
    OmenSignal {
        signal_id: id.to_string(),
        source_event_id: format!("evt-{}", id),
        trace_id: "0123456789abcdef".to_string(),
        title: "Red Sea shipping disruption".to_string(),
        description: "fixture".to_string(),
        probability: 0.72,
        probability_source: "polymarket".to_string(),
        confidence_score: 0.81,
        confidence_interval: ConfidenceInterval {
            point_estimate: 0.81,
            lower_bound: 0.74,
            upper_bound: 0.88,
            confidence_level: 0.95,
            method: "weighted_bayesian".to_string(),
        },
        confidence_level: ConfidenceLevel::High,
        category: SignalCategory::Geopolitical,
        signal_type: SignalType::GeopoliticalConflict,
        status: SignalStatus::Active,
        geographic: GeographicScope {
            regions: vec!["Middle East".to_string()],
            chokepoints: vec!["Red Sea".to_string(), "Suez Canal".to_string()],
        },
        temporal: TemporalScope::default(),
        impact_hints: ImpactHints {
            domains: vec![AffectedDomain::Shipping, AffectedDomain::Logistics],
            direction: ImpactDirection::Negative,
            affected_asset_types: assets.iter().map(|s| s.to_string()).collect(),
            keywords: vec!["red sea".to_string()],
        },
        evidence: vec![Evidence {
            source: "liquidity_validation".to_string(),
            description: "liquidity $75000 acceptable".to_string(),
            reference: None,
            observed_at: Utc::now(),
        }],
        ruleset_version: "omen-v1.0.0".to_string(),
        generated_at: Utc::now(),
        input_event_hash: format!("hash-{}", id),
    }
}

fn seed(state: &AppState, id: &str, assets: &[&str]) {
    let signal = seeded_signal(id, assets);
    let emit = EmitResult {
        status: EmitStatus::Delivered,
        signal_id: signal.signal_id.clone(),
        ledger_partition: Some(Utc::now().format("%Y-%m-%d").to_string()),
        ack_id: Some("ack".to_string()),
        error: None,
    };
    state.repository.store_emitted(&signal, &emit);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_is_public_and_structured() {
    let server = spawn_server(vec!["test-key".to_string()]).await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(["healthy", "degraded", "unhealthy"]
        .contains(&body["status"].as_str().unwrap()));
    assert!(body["version"].is_string());
    assert!(body["components"]["pipeline"].is_object());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_and_invalid_keys_get_envelope_401() {
    let server = spawn_server(vec!["test-key".to_string()]).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/signals", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "AUTHENTICATION_REQUIRED");
    assert!(body["timestamp"].is_string());
    assert!(body["documentation_url"].is_string());
    assert!(body["request_id"].is_string());

    let response = client
        .get(format!("{}/api/v1/signals", server.base_url))
        .header("X-API-Key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_API_KEY");
}

#[tokio::test(flavor = "multi_thread")]
async fn signals_paginate_and_fetch_by_id() {
    let server = spawn_server(vec!["test-key".to_string()]).await;
    for i in 0..5 {
        seed(&server.state, &format!("OMEN-API{}", i), &["crude_oil"]);
    }
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/v1/signals?limit=2", server.base_url))
        .header("X-API-Key", "test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);
    let cursor = body["cursor"].as_i64().unwrap();

    let next: serde_json::Value = client
        .get(format!(
            "{}/api/v1/signals?limit=2&cursor={}",
            server.base_url, cursor
        ))
        .header("X-API-Key", "test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first_ids: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["signal_id"].as_str().unwrap())
        .collect();
    let next_ids: Vec<&str> = next["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["signal_id"].as_str().unwrap())
        .collect();
    assert!(first_ids.iter().all(|id| !next_ids.contains(id)));

    let one: serde_json::Value = client
        .get(format!("{}/api/v1/signals/OMEN-API3", server.base_url))
        .header("X-API-Key", "test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["signal_id"], "OMEN-API3");

    let missing = client
        .get(format!("{}/api/v1/signals/OMEN-NOPE", server.base_url))
        .header("X-API-Key", "test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "NOT_FOUND");
}

/// Invariant 5: a deep scan of /signals and /partner-signals responses
/// finds none of the forbidden decision-engine fields.
#[tokio::test(flavor = "multi_thread")]
async fn no_forbidden_fields_anywhere() {
    let server = spawn_server(vec!["test-key".to_string()]).await;
    seed(&server.state, "OMEN-CLEAN", &["crude_oil", "gold"]);
    let client = reqwest::Client::new();

    for path in [
        "/api/v1/signals",
        "/api/v1/signals/OMEN-CLEAN",
        "/api/v1/partner-signals",
        "/api/v1/partner-signals/crude_oil",
    ] {
        let text = client
            .get(format!("{}{}", server.base_url, path))
            .header("X-API-Key", "test-key")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        for forbidden in FORBIDDEN_FIELDS {
            assert!(
                !text.contains(&format!("\"{}\"", forbidden)),
                "{} leaked a forbidden field: {}",
                path,
                forbidden
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn activity_feed_reflects_audit_log() {
    let server = spawn_server(vec![]).await; // auth off without keys
    server
        .state
        .audit
        .log_operation(
            AuditOperation::Insert,
            "omen",
            "signals",
            "OMEN-ACT",
            None,
            None,
            None,
            AuditSourceType::Real,
            "pipeline",
            "signal emitted",
            None,
        )
        .unwrap();

    let body: serde_json::Value = reqwest::get(format!("{}/activity", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "signal");
    assert_eq!(events[0]["target_id"], "OMEN-ACT");
    assert_eq!(events[0]["source_type"], "REAL");
}

#[tokio::test(flavor = "multi_thread")]
async fn live_status_reports_gate() {
    let server = spawn_server(vec![]).await;
    let body: serde_json::Value =
        reqwest::get(format!("{}/api/v1/live/status", server.base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert!(body["can_go_live"].is_boolean());
    assert!(body["sources"].as_array().unwrap().len() >= 7);
    // The default test environment has mock sources, so live is blocked.
    assert_eq!(body["can_go_live"], false);
    assert!(!body["blockers"].as_array().unwrap().is_empty());
}
