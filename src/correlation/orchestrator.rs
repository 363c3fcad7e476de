//! Cross-source orchestration.
//!
//! When a signal arrives, derive its keywords, look up correlated assets,
//! fetch their latest prices in parallel (bounded per-fetch timeout,
//! gather-with-timeout: whatever completes in the window is used), detect
//! conflicts with other recent signals, and turn the whole picture into a
//! bounded confidence adjustment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::correlation::assets::AssetCorrelationMatrix;
use crate::correlation::conflict::{ConflictDetector, ConflictResult};
use crate::models::RawEvent;

/// Port to asset price data (stock/commodity adapters implement this).
#[async_trait]
pub trait AssetDataPort: Send + Sync {
    async fn latest_price(&self, symbol: &str) -> Option<f64>;
    /// Returns (absolute_change, percent_change) over the last 24h.
    async fn price_change_24h(&self, symbol: &str) -> Option<(f64, f64)>;
}

/// Data fetched for one correlated asset.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CorrelatedAssetData {
    pub symbol: String,
    pub price: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub price_change_pct: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    pub correlation_strength: f64,
}

/// Result of a cross-source correlation pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CrossSourceCorrelationResult {
    pub original_signal_id: String,
    pub triggered_at: DateTime<Utc>,
    pub event_keywords: Vec<String>,
    pub suggested_assets: Vec<(String, Vec<String>)>,
    pub fetched_assets: Vec<CorrelatedAssetData>,
    pub conflicts: Vec<ConflictResult>,
    pub confidence_adjustment: f64,
    pub correlation_summary: String,
}

pub struct CrossSourceOrchestrator {
    asset_port: Option<Arc<dyn AssetDataPort>>,
    conflict_detector: ConflictDetector,
    fetch_timeout: Duration,
}

impl CrossSourceOrchestrator {
    pub fn new(asset_port: Option<Arc<dyn AssetDataPort>>) -> Self {
        Self {
            asset_port,
            conflict_detector: ConflictDetector::new(),
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Main entry point: correlate an incoming signal against assets and
    /// other recent signals.
    pub async fn process_signal(
        &self,
        signal: &RawEvent,
        additional_signals: &[RawEvent],
    ) -> CrossSourceCorrelationResult {
        let triggered_at = Utc::now();
        let keywords = self.extract_keywords(signal);

        let suggested = AssetCorrelationMatrix::suggest_assets_to_check(&keywords);
        let suggested_assets: Vec<(String, Vec<String>)> = suggested
            .iter()
            .map(|(k, assets)| (k.clone(), assets.iter().map(|a| a.to_string()).collect()))
            .collect();

        let fetched_assets = self.fetch_correlated_assets(&suggested_assets, &keywords).await;

        let mut all_signals = vec![signal.clone()];
        all_signals.extend_from_slice(additional_signals);
        let conflicts = self.conflict_detector.detect_conflicts(&all_signals);

        let confidence_adjustment =
            self.calculate_confidence_adjustment(&fetched_assets, &conflicts);

        let correlation_summary =
            self.summary(signal, &suggested_assets, &fetched_assets, &conflicts);

        CrossSourceCorrelationResult {
            original_signal_id: signal.event_id.clone(),
            triggered_at,
            event_keywords: keywords,
            suggested_assets,
            fetched_assets,
            conflicts,
            confidence_adjustment,
            correlation_summary,
        }
    }

    pub fn detect_conflicts(&self, signals: &[RawEvent]) -> Vec<ConflictResult> {
        self.conflict_detector.detect_conflicts(signals)
    }

    fn extract_keywords(&self, signal: &RawEvent) -> Vec<String> {
        let mut keywords: HashSet<String> = signal.keywords.iter().cloned().collect();
        let skip = ["the", "and", "for", "from", "with"];
        let meaningful: Vec<String> = signal
            .title
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3 && !skip.contains(w))
            .take(5)
            .map(|w| w.to_string())
            .collect();
        keywords.extend(meaningful);
        let mut out: Vec<String> = keywords.into_iter().collect();
        out.sort_unstable();
        out
    }

    async fn fetch_correlated_assets(
        &self,
        suggested: &[(String, Vec<String>)],
        keywords: &[String],
    ) -> Vec<CorrelatedAssetData> {
        let Some(port) = &self.asset_port else {
            return Vec::new();
        };

        let mut symbols: Vec<String> = suggested
            .iter()
            .flat_map(|(_, assets)| assets.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        symbols.sort_unstable();
        if symbols.is_empty() {
            return Vec::new();
        }

        debug!(assets = symbols.len(), "fetching correlated assets");

        let fetches = symbols.into_iter().map(|symbol| {
            let port = port.clone();
            let strength = AssetCorrelationMatrix::strength_for_keywords(&symbol, keywords);
            let timeout = self.fetch_timeout;
            async move {
                match tokio::time::timeout(timeout, async {
                    let price = port.latest_price(&symbol).await;
                    let change = port.price_change_24h(&symbol).await;
                    (price, change)
                })
                .await
                {
                    Ok((Some(price), change)) => Some(CorrelatedAssetData {
                        symbol,
                        price: Some(price),
                        price_change_24h: change.map(|(abs, _)| abs),
                        price_change_pct: change.map(|(_, pct)| pct),
                        fetched_at: Utc::now(),
                        correlation_strength: strength,
                    }),
                    Ok((None, _)) => None,
                    Err(_) => {
                        warn!(symbol = %symbol, "asset fetch timed out");
                        None
                    }
                }
            }
        });

        futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Cross-source boost applied before conflict penalties:
    /// +0.10 when >=2 strongly-correlated assets confirm, +0.15 for >=3.
    /// Total clamped to [-0.3, +0.3].
    fn calculate_confidence_adjustment(
        &self,
        fetched_assets: &[CorrelatedAssetData],
        conflicts: &[ConflictResult],
    ) -> f64 {
        let mut adjustment = 0.0;

        let confirming = fetched_assets
            .iter()
            .filter(|a| a.correlation_strength > 0.7 && a.price_change_pct.is_some())
            .count();
        if confirming >= 3 {
            adjustment += 0.15;
        } else if confirming >= 2 {
            adjustment += 0.10;
        }

        for conflict in conflicts {
            if conflict.has_conflict {
                adjustment += conflict.confidence_adjustment;
            }
        }

        adjustment.clamp(-0.3, 0.3)
    }

    fn summary(
        &self,
        signal: &RawEvent,
        suggested: &[(String, Vec<String>)],
        fetched: &[CorrelatedAssetData],
        conflicts: &[ConflictResult],
    ) -> String {
        let mut parts = vec![format!("Signal: {}", signal.title)];

        if !suggested.is_empty() {
            let asset_list: Vec<String> = suggested
                .iter()
                .map(|(keyword, assets)| {
                    format!(
                        "{} -> {}",
                        keyword,
                        assets.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                    )
                })
                .collect();
            parts.push(format!("Correlated assets: {}", asset_list.join("; ")));
        }

        let movers: Vec<String> = fetched
            .iter()
            .filter_map(|a| {
                a.price_change_pct
                    .filter(|pct| pct.abs() > 1.0)
                    .map(|pct| format!("{} ({:+.1}%)", a.symbol, pct))
            })
            .take(5)
            .collect();
        if !movers.is_empty() {
            parts.push(format!("Significant movers: {}", movers.join(", ")));
        }

        let active: Vec<&ConflictResult> = conflicts.iter().filter(|c| c.has_conflict).collect();
        if !active.is_empty() {
            parts.push(format!("Conflicts detected: {}", active.len()));
        }

        parts.join(" | ")
    }
}
