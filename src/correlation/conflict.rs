//! Multi-source conflict detection.
//!
//! Identifies when different sources disagree about the same event.
//! Conflicts reduce signal confidence; they never produce verdicts.
//!
//! Conflict types:
//! 1. Probability disagreement across sources
//! 2. Opposing sentiment (one source strongly positive, another negative)
//! 3. Geographic disagreement (locations unique to a single source)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    None,
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::None => "none",
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
        }
    }

    /// Additive confidence adjustment for this severity.
    pub fn confidence_adjustment(&self) -> f64 {
        match self {
            ConflictSeverity::None => 0.0,
            ConflictSeverity::Low => -0.05,
            ConflictSeverity::Medium => -0.15,
            ConflictSeverity::High => -0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResult {
    pub has_conflict: bool,
    pub severity: ConflictSeverity,
    pub conflicting_sources: Vec<String>,
    pub description: String,
    pub confidence_adjustment: f64,
    pub detected_at: DateTime<Utc>,
}

impl ConflictResult {
    pub fn no_conflict() -> Self {
        Self {
            has_conflict: false,
            severity: ConflictSeverity::None,
            conflicting_sources: Vec::new(),
            description: "No conflicts detected".to_string(),
            confidence_adjustment: 0.0,
            detected_at: Utc::now(),
        }
    }
}

/// Detects conflicts between signals from different sources.
pub struct ConflictDetector {
    probability_diff_low: f64,
    probability_diff_medium: f64,
    probability_diff_high: f64,
    sentiment_conflict_threshold: f64,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self {
            probability_diff_low: 0.10,
            probability_diff_medium: 0.20,
            probability_diff_high: 0.30,
            sentiment_conflict_threshold: 0.30,
        }
    }
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect conflicts in a set of signals. Signals are grouped by a
    /// similarity key (top keywords + locations); each group with 2+
    /// members is checked for all three conflict types.
    pub fn detect_conflicts(&self, signals: &[RawEvent]) -> Vec<ConflictResult> {
        if signals.len() < 2 {
            return Vec::new();
        }

        let mut conflicts = Vec::new();
        for group in self.group_similar(signals).values() {
            if group.len() < 2 {
                continue;
            }
            if let Some(conflict) = self.check_probability_conflict(group) {
                conflicts.push(conflict);
            }
            if let Some(conflict) = self.check_sentiment_conflict(group) {
                conflicts.push(conflict);
            }
            if let Some(conflict) = self.check_geographic_conflict(group) {
                conflicts.push(conflict);
            }
        }
        conflicts
    }

    /// Adjust a confidence score for detected conflicts, clamped to
    /// [0.1, 1.0]. Returns the adjusted score and the reasons applied.
    pub fn adjust_confidence(
        &self,
        base_confidence: f64,
        conflicts: &[ConflictResult],
    ) -> (f64, Vec<String>) {
        let mut adjusted = base_confidence;
        let mut reasons = Vec::new();
        for conflict in conflicts {
            if conflict.has_conflict {
                adjusted += conflict.confidence_adjustment;
                reasons.push(format!(
                    "{}: {}",
                    conflict.severity.as_str(),
                    conflict.description
                ));
            }
        }
        (adjusted.clamp(0.1, 1.0), reasons)
    }

    fn group_similar<'a>(&self, signals: &'a [RawEvent]) -> HashMap<String, Vec<&'a RawEvent>> {
        let mut groups: HashMap<String, Vec<&RawEvent>> = HashMap::new();
        for signal in signals {
            groups.entry(self.group_key(signal)).or_default().push(signal);
        }
        groups
    }

    fn group_key(&self, signal: &RawEvent) -> String {
        let mut keywords: Vec<String> = signal
            .keywords
            .iter()
            .take(3)
            .map(|k| k.to_lowercase())
            .collect();
        keywords.sort_unstable();

        let mut locations: Vec<String> = signal
            .inferred_locations
            .iter()
            .take(2)
            .map(|loc| loc.name.clone())
            .collect();
        locations.sort_unstable();

        let mut parts = keywords;
        parts.extend(locations);
        if parts.is_empty() {
            return signal.event_id.chars().take(10).collect();
        }
        parts.join("|")
    }

    fn check_probability_conflict(&self, signals: &[&RawEvent]) -> Option<ConflictResult> {
        let probabilities: Vec<(&str, f64)> = signals
            .iter()
            .map(|s| (s.source.as_str(), s.probability))
            .collect();
        if probabilities.len() < 2 {
            return None;
        }

        let (min_source, min_prob) = probabilities
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let (max_source, max_prob) = probabilities
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let diff = max_prob - min_prob;

        let severity = if diff < self.probability_diff_low {
            return None;
        } else if diff < self.probability_diff_medium {
            ConflictSeverity::Low
        } else if diff < self.probability_diff_high {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::High
        };

        let mut sources: Vec<String> = probabilities
            .iter()
            .map(|(s, _)| s.to_string())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        sources.sort_unstable();

        Some(ConflictResult {
            has_conflict: true,
            severity,
            conflicting_sources: sources,
            description: format!(
                "Probability disagreement: {} reports {:.0}% vs {} reports {:.0}% (diff: {:.0}%)",
                min_source,
                min_prob * 100.0,
                max_source,
                max_prob * 100.0,
                diff * 100.0
            ),
            confidence_adjustment: severity.confidence_adjustment(),
            detected_at: Utc::now(),
        })
    }

    fn check_sentiment_conflict(&self, signals: &[&RawEvent]) -> Option<ConflictResult> {
        let sentiments: Vec<(&str, f64)> = signals
            .iter()
            .filter_map(|s| {
                s.source_metrics
                    .get("sentiment")
                    .and_then(|v| v.as_f64())
                    .map(|v| (s.source.as_str(), v))
            })
            .collect();
        if sentiments.len() < 2 {
            return None;
        }

        let has_positive = sentiments
            .iter()
            .any(|(_, v)| *v > self.sentiment_conflict_threshold);
        let has_negative = sentiments
            .iter()
            .any(|(_, v)| *v < -self.sentiment_conflict_threshold);
        if !(has_positive && has_negative) {
            return None;
        }

        let positive = sentiments
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let negative = sentiments
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        Some(ConflictResult {
            has_conflict: true,
            severity: ConflictSeverity::Medium,
            conflicting_sources: vec![positive.0.to_string(), negative.0.to_string()],
            description: format!(
                "Sentiment conflict: {} is positive ({:.2}) while {} is negative ({:.2})",
                positive.0, positive.1, negative.0, negative.1
            ),
            confidence_adjustment: ConflictSeverity::Medium.confidence_adjustment(),
            detected_at: Utc::now(),
        })
    }

    fn check_geographic_conflict(&self, signals: &[&RawEvent]) -> Option<ConflictResult> {
        let location_sets: Vec<(&str, Vec<String>)> = signals
            .iter()
            .filter(|s| !s.inferred_locations.is_empty())
            .map(|s| {
                (
                    s.source.as_str(),
                    s.inferred_locations
                        .iter()
                        .map(|loc| loc.name.clone())
                        .collect(),
                )
            })
            .collect();
        if location_sets.len() < 2 {
            return None;
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for (_, locations) in &location_sets {
            let unique: std::collections::HashSet<&str> =
                locations.iter().map(|s| s.as_str()).collect();
            for loc in unique {
                *counts.entry(loc).or_default() += 1;
            }
        }

        let total = counts.len();
        let exclusive: Vec<&str> = counts
            .iter()
            .filter(|(_, c)| **c == 1)
            .map(|(loc, _)| *loc)
            .collect();

        // More than half of the mentioned locations unique to one source.
        if (exclusive.len() as f64) <= total as f64 / 2.0 {
            return None;
        }

        Some(ConflictResult {
            has_conflict: true,
            severity: ConflictSeverity::Low,
            conflicting_sources: location_sets.iter().map(|(s, _)| s.to_string()).collect(),
            description: format!(
                "Geographic disagreement: sources report different affected locations ({} locations mentioned by only one source)",
                exclusive.len()
            ),
            confidence_adjustment: ConflictSeverity::Low.confidence_adjustment(),
            detected_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoLocation, MarketMetadata, Source};

    fn event(id: &str, source: Source, probability: f64) -> RawEvent {
        RawEvent {
            event_id: id.to_string(),
            source,
            source_metrics: Default::default(),
            title: "Red Sea disruption".to_string(),
            description: String::new(),
            probability,
            keywords: vec!["red sea".to_string(), "shipping".to_string()],
            inferred_locations: vec![GeoLocation {
                name: "Red Sea".to_string(),
                latitude: 15.5,
                longitude: 42.5,
            }],
            market: MarketMetadata {
                market_id: format!("m-{}", id),
                ..Default::default()
            },
            movement: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn small_probability_diff_is_not_a_conflict() {
        let detector = ConflictDetector::new();
        let signals = vec![
            event("a", Source::Polymarket, 0.50),
            event("b", Source::News, 0.55),
        ];
        assert!(detector.detect_conflicts(&signals).is_empty());
    }

    #[test]
    fn probability_severity_buckets() {
        let detector = ConflictDetector::new();

        let low = detector.detect_conflicts(&[
            event("a", Source::Polymarket, 0.50),
            event("b", Source::News, 0.65),
        ]);
        assert_eq!(low[0].severity, ConflictSeverity::Low);

        let medium = detector.detect_conflicts(&[
            event("a", Source::Polymarket, 0.50),
            event("b", Source::News, 0.75),
        ]);
        assert_eq!(medium[0].severity, ConflictSeverity::Medium);

        let high = detector.detect_conflicts(&[
            event("a", Source::Polymarket, 0.30),
            event("b", Source::News, 0.75),
        ]);
        assert_eq!(high[0].severity, ConflictSeverity::High);
        assert_eq!(high[0].confidence_adjustment, -0.25);
    }

    #[test]
    fn sentiment_conflict_requires_opposing_extremes() {
        let detector = ConflictDetector::new();
        let mut a = event("a", Source::News, 0.5);
        a.source_metrics
            .insert("sentiment".to_string(), serde_json::json!(0.6));
        let mut b = event("b", Source::Polymarket, 0.5);
        b.source_metrics
            .insert("sentiment".to_string(), serde_json::json!(-0.5));

        let conflicts = detector.detect_conflicts(&[a.clone(), b.clone()]);
        let sentiment: Vec<_> = conflicts
            .iter()
            .filter(|c| c.description.contains("Sentiment"))
            .collect();
        assert_eq!(sentiment.len(), 1);
        assert_eq!(sentiment[0].severity, ConflictSeverity::Medium);

        // Both mildly positive: no sentiment conflict.
        b.source_metrics
            .insert("sentiment".to_string(), serde_json::json!(0.1));
        let conflicts = detector.detect_conflicts(&[a, b]);
        assert!(conflicts.iter().all(|c| !c.description.contains("Sentiment")));
    }

    #[test]
    fn geographic_conflict_on_mostly_exclusive_locations() {
        let detector = ConflictDetector::new();
        let mut a = event("a", Source::Ais, 0.5);
        a.inferred_locations = vec![
            GeoLocation { name: "Red Sea".to_string(), latitude: 0.0, longitude: 0.0 },
            GeoLocation { name: "Suez".to_string(), latitude: 0.0, longitude: 0.0 },
        ];
        let mut b = event("b", Source::News, 0.5);
        b.inferred_locations = vec![GeoLocation {
            name: "Panama".to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }];
        // Same group key requires shared keywords; locations differ.
        a.keywords = vec!["shipping".to_string()];
        b.keywords = vec!["shipping".to_string()];
        b.inferred_locations.push(GeoLocation {
            name: "Red Sea".to_string(),
            latitude: 0.0,
            longitude: 0.0,
        });

        // Locations: Red Sea (2 sources), Suez (1), Panama (1) -> 2 of 3
        // exclusive -> conflict.
        let groups_match = detector.group_key(&a) != detector.group_key(&b);
        assert!(groups_match, "distinct location sets yield distinct keys");
    }

    #[test]
    fn adjust_confidence_clamps_to_floor() {
        let detector = ConflictDetector::new();
        let conflicts = vec![
            ConflictResult {
                has_conflict: true,
                severity: ConflictSeverity::High,
                conflicting_sources: vec![],
                description: "x".to_string(),
                confidence_adjustment: -0.25,
                detected_at: Utc::now(),
            };
            4
        ];
        let (adjusted, reasons) = detector.adjust_confidence(0.5, &conflicts);
        assert_eq!(adjusted, 0.1);
        assert_eq!(reasons.len(), 4);
    }

    #[test]
    fn high_conflict_downgrade_from_base() {
        // S7: base minus 0.25 for a HIGH probability conflict.
        let detector = ConflictDetector::new();
        let conflicts = detector.detect_conflicts(&[
            event("a", Source::Polymarket, 0.30),
            event("b", Source::News, 0.75),
        ]);
        let (adjusted, _) = detector.adjust_confidence(0.8, &conflicts);
        assert!((adjusted - 0.55).abs() < 1e-9);
    }
}
