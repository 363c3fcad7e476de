//! Source trust management.
//!
//! Trust scores weight signals during aggregation, break ties between
//! conflicting sources, and feed the reliability term of the confidence
//! calculator. Updates use exponential moving averages so a single bad
//! fetch does not crater a source.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::TrustLevel;

const ACCURACY_WEIGHT: f64 = 0.4;
const RELIABILITY_WEIGHT: f64 = 0.3;
const FRESHNESS_WEIGHT: f64 = 0.3;

const LATENCY_EMA_ALPHA: f64 = 0.1;
const ERROR_EMA_ALPHA: f64 = 0.05;
const FRESHNESS_EMA_ALPHA: f64 = 0.1;

/// Trust score for a single data source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceTrustScore {
    pub source_id: String,
    pub trust_level: TrustLevel,
    pub trust_score: f64,

    pub accuracy_rate: f64,
    pub total_signals: u64,
    pub accurate_signals: u64,

    pub avg_latency_ms: f64,
    pub error_rate: f64,

    pub avg_data_age_seconds: f64,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl SourceTrustScore {
    fn new(source_id: &str, trust_score: f64) -> Self {
        Self {
            source_id: source_id.to_string(),
            trust_level: TrustLevel::from_score(trust_score),
            trust_score,
            accuracy_rate: 0.0,
            total_signals: 0,
            accurate_signals: 0,
            avg_latency_ms: 0.0,
            error_rate: 0.0,
            avg_data_age_seconds: 0.0,
            last_successful_fetch: None,
            last_updated: Utc::now(),
        }
    }

    fn update_accuracy(&mut self, was_accurate: bool) {
        self.total_signals += 1;
        if was_accurate {
            self.accurate_signals += 1;
        }
        self.accuracy_rate = self.accurate_signals as f64 / self.total_signals as f64;
        self.recalculate();
    }

    fn update_reliability(&mut self, success: bool, latency_ms: f64) {
        if self.avg_latency_ms == 0.0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms =
                LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * self.avg_latency_ms;
        }

        let error_value = if success { 0.0 } else { 1.0 };
        self.error_rate =
            ERROR_EMA_ALPHA * error_value + (1.0 - ERROR_EMA_ALPHA) * self.error_rate;

        if success {
            self.last_successful_fetch = Some(Utc::now());
        }
        self.recalculate();
    }

    fn update_freshness(&mut self, data_age_seconds: f64) {
        if self.avg_data_age_seconds == 0.0 {
            self.avg_data_age_seconds = data_age_seconds;
        } else {
            self.avg_data_age_seconds = FRESHNESS_EMA_ALPHA * data_age_seconds
                + (1.0 - FRESHNESS_EMA_ALPHA) * self.avg_data_age_seconds;
        }
        self.recalculate();
    }

    fn recalculate(&mut self) {
        let accuracy_score = self.accuracy_rate;

        let mut reliability_score = (1.0 - self.error_rate).max(0.0);
        if self.avg_latency_ms > 5000.0 {
            reliability_score *= 0.5;
        }

        let freshness_score = if self.avg_data_age_seconds < 60.0 {
            1.0
        } else if self.avg_data_age_seconds < 300.0 {
            0.8
        } else if self.avg_data_age_seconds < 900.0 {
            0.6
        } else {
            0.3
        };

        self.trust_score = ACCURACY_WEIGHT * accuracy_score
            + RELIABILITY_WEIGHT * reliability_score
            + FRESHNESS_WEIGHT * freshness_score;
        self.trust_level = TrustLevel::from_score(self.trust_score);
        self.last_updated = Utc::now();
    }
}

/// Manages trust scores for all sources. Each score sits behind its own
/// mutex so EMA updates from concurrent fetches do not contend globally.
pub struct SourceTrustManager {
    scores: Mutex<HashMap<String, Arc<Mutex<SourceTrustScore>>>>,
}

/// Seed trust for known sources.
const DEFAULT_TRUST_SCORES: &[(&str, f64)] = &[
    ("polymarket", 0.75),
    ("stock", 0.85),
    ("commodity", 0.80),
    ("ais", 0.70),
    ("weather", 0.85),
    ("freight", 0.75),
    ("news", 0.60),
];

impl Default for SourceTrustManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTrustManager {
    pub fn new() -> Self {
        let mut scores = HashMap::new();
        for (source_id, score) in DEFAULT_TRUST_SCORES {
            scores.insert(
                source_id.to_string(),
                Arc::new(Mutex::new(SourceTrustScore::new(source_id, *score))),
            );
        }
        Self {
            scores: Mutex::new(scores),
        }
    }

    fn entry(&self, source_id: &str) -> Arc<Mutex<SourceTrustScore>> {
        self.scores
            .lock()
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SourceTrustScore::new(source_id, 0.5))))
            .clone()
    }

    pub fn trust_score(&self, source_id: &str) -> SourceTrustScore {
        self.entry(source_id).lock().clone()
    }

    /// Normalized weight for aggregation, in [0,1].
    pub fn trust_weight(&self, source_id: &str) -> f64 {
        self.entry(source_id).lock().trust_score
    }

    pub fn record_signal_accuracy(&self, source_id: &str, was_accurate: bool) {
        self.entry(source_id).lock().update_accuracy(was_accurate);
    }

    pub fn record_api_call(&self, source_id: &str, success: bool, latency_ms: f64) {
        self.entry(source_id)
            .lock()
            .update_reliability(success, latency_ms);
    }

    pub fn record_data_freshness(&self, source_id: &str, data_age_seconds: f64) {
        self.entry(source_id).lock().update_freshness(data_age_seconds);
    }

    /// Resolve a two-source conflict by trust weight.
    /// Returns (winning_source, confidence in the winner).
    pub fn resolve_conflict(&self, source_a: &str, source_b: &str) -> (String, f64) {
        let trust_a = self.trust_weight(source_a);
        let trust_b = self.trust_weight(source_b);
        let total = trust_a + trust_b;
        if trust_a >= trust_b {
            let confidence = if total > 0.0 { trust_a / total } else { 0.5 };
            (source_a.to_string(), confidence)
        } else {
            let confidence = if total > 0.0 { trust_b / total } else { 0.5 };
            (source_b.to_string(), confidence)
        }
    }

    /// Trust-weighted average of per-source values.
    /// Returns (weighted_average, total_weight).
    pub fn weighted_average(&self, values: &[(String, f64)]) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 0.0);
        }
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (source_id, value) in values {
            let weight = self.trust_weight(source_id);
            weighted_sum += value * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            let mean = values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64;
            return (mean, 1.0);
        }
        (weighted_sum / total_weight, total_weight)
    }

    pub fn all_scores(&self) -> Vec<SourceTrustScore> {
        let mut scores: Vec<SourceTrustScore> = self
            .scores
            .lock()
            .values()
            .map(|s| s.lock().clone())
            .collect();
        scores.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        scores
    }

    fn reset(&self) {
        let mut scores = self.scores.lock();
        scores.clear();
        for (source_id, score) in DEFAULT_TRUST_SCORES {
            scores.insert(
                source_id.to_string(),
                Arc::new(Mutex::new(SourceTrustScore::new(source_id, *score))),
            );
        }
    }
}

lazy_static! {
    static ref TRUST_MANAGER: Arc<SourceTrustManager> = Arc::new(SourceTrustManager::new());
}

pub fn global_trust_manager() -> Arc<SourceTrustManager> {
    TRUST_MANAGER.clone()
}

/// Test hook: restore default scores.
pub fn reset_trust_manager() {
    TRUST_MANAGER.reset();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_seeded() {
        let manager = SourceTrustManager::new();
        assert_eq!(manager.trust_weight("polymarket"), 0.75);
        assert_eq!(manager.trust_weight("news"), 0.60);
        // Unknown sources start at medium.
        assert_eq!(manager.trust_weight("mystery"), 0.5);
    }

    #[test]
    fn accuracy_updates_move_the_score() {
        let manager = SourceTrustManager::new();
        for _ in 0..10 {
            manager.record_signal_accuracy("news", true);
        }
        manager.record_data_freshness("news", 10.0);
        let score = manager.trust_score("news");
        assert_eq!(score.accuracy_rate, 1.0);
        // 0.4*1.0 + 0.3*1.0 + 0.3*1.0 = 1.0 with no errors and fresh data
        assert!(score.trust_score > 0.9);
        assert_eq!(score.trust_level, TrustLevel::Authoritative);
    }

    #[test]
    fn slow_source_is_penalized() {
        let manager = SourceTrustManager::new();
        manager.record_signal_accuracy("slow", true);
        manager.record_data_freshness("slow", 10.0);
        manager.record_api_call("slow", true, 10_000.0);
        let score = manager.trust_score("slow");
        // Reliability halves when average latency exceeds 5s.
        assert!(score.trust_score < 0.9);
    }

    #[test]
    fn conflict_resolution_prefers_higher_trust() {
        let manager = SourceTrustManager::new();
        let (winner, confidence) = manager.resolve_conflict("stock", "news");
        assert_eq!(winner, "stock");
        assert!(confidence > 0.5);
    }

    #[test]
    fn weighted_average_uses_trust() {
        let manager = SourceTrustManager::new();
        let (avg, weight) = manager.weighted_average(&[
            ("stock".to_string(), 1.0),
            ("news".to_string(), 0.0),
        ]);
        // stock (0.85) dominates news (0.60)
        assert!(avg > 0.5);
        assert!((weight - 1.45).abs() < 1e-9);
    }
}
