//! Confidence calculation with uncertainty quantification.
//!
//! Point estimate is a fixed weighted average of base quality, data
//! completeness, and source reliability. The interval around it is a
//! standard-error proxy that grows with incomplete data and unreliable
//! sources and shrinks with sample size.

use crate::models::ConfidenceInterval;

const BASE_WEIGHT: f64 = 0.40;
const COMPLETENESS_WEIGHT: f64 = 0.30;
const RELIABILITY_WEIGHT: f64 = 0.30;

const BASE_UNCERTAINTY: f64 = 0.05;
const MAX_UNCERTAINTY: f64 = 0.25;

const Z_SCORES: &[(f64, f64)] = &[(0.90, 1.645), (0.95, 1.960), (0.99, 2.576)];
const DEFAULT_Z: f64 = 1.960;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceCalculator;

impl ConfidenceCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Compute the point estimate and its confidence interval.
    pub fn calculate_with_interval(
        &self,
        base_confidence: f64,
        data_completeness: f64,
        source_reliability: f64,
        sample_size: Option<u64>,
        confidence_level: f64,
    ) -> ConfidenceInterval {
        let base = base_confidence.clamp(0.0, 1.0);
        let completeness = data_completeness.clamp(0.0, 1.0);
        let reliability = source_reliability.clamp(0.0, 1.0);

        let point = (BASE_WEIGHT * base
            + COMPLETENESS_WEIGHT * completeness
            + RELIABILITY_WEIGHT * reliability)
            .clamp(0.0, 1.0);

        let uncertainty = self.uncertainty(completeness, reliability, sample_size);
        let margin = Self::z_score(confidence_level) * uncertainty;

        ConfidenceInterval {
            point_estimate: round4(point),
            lower_bound: round4((point - margin).max(0.0)),
            upper_bound: round4((point + margin).min(1.0)),
            confidence_level,
            method: "weighted_bayesian".to_string(),
        }
    }

    fn uncertainty(
        &self,
        data_completeness: f64,
        source_reliability: f64,
        sample_size: Option<u64>,
    ) -> f64 {
        let mut uncertainty = BASE_UNCERTAINTY;
        if data_completeness < 1.0 {
            uncertainty += (1.0 - data_completeness) * 0.10;
        }
        if source_reliability < 0.9 {
            uncertainty += (0.9 - source_reliability) * 0.10;
        }
        if let Some(n) = sample_size {
            if n > 0 {
                uncertainty /= (n as f64).sqrt();
            }
        }
        uncertainty.min(MAX_UNCERTAINTY)
    }

    fn z_score(confidence_level: f64) -> f64 {
        Z_SCORES
            .iter()
            .find(|(level, _)| (level - confidence_level).abs() < 1e-9)
            .map(|(_, z)| *z)
            .unwrap_or(DEFAULT_Z)
    }

    /// Combine multiple intervals with inverse-variance weighting: tighter
    /// intervals count for more. Width 0 gets a fixed high weight.
    pub fn combine(&self, intervals: &[ConfidenceInterval]) -> ConfidenceInterval {
        if intervals.is_empty() {
            return ConfidenceInterval {
                point_estimate: 0.5,
                lower_bound: 0.0,
                upper_bound: 1.0,
                confidence_level: 0.95,
                method: "default".to_string(),
            };
        }
        if intervals.len() == 1 {
            return intervals[0].clone();
        }

        let weights: Vec<f64> = intervals
            .iter()
            .map(|interval| {
                let width = interval.width();
                if width > 0.0 {
                    1.0 / (width * width)
                } else {
                    100.0
                }
            })
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let combined_estimate: f64 = weights
            .iter()
            .zip(intervals)
            .map(|(w, interval)| w * interval.point_estimate)
            .sum::<f64>()
            / total_weight;

        let combined_se = (1.0 / total_weight).sqrt();
        let margin = DEFAULT_Z * combined_se;

        ConfidenceInterval {
            point_estimate: round4(combined_estimate),
            lower_bound: round4((combined_estimate - margin).max(0.0)),
            upper_bound: round4((combined_estimate + margin).min(1.0)),
            confidence_level: 0.95,
            method: "inverse_variance_weighted".to_string(),
        }
    }

    /// Widen the interval and shift the point for a detected conflict.
    /// severity: "none" | "low" | "medium" | "high".
    pub fn adjust_for_conflicts(
        &self,
        interval: &ConfidenceInterval,
        conflict_severity: &str,
    ) -> ConfidenceInterval {
        let (point_adj, width_mult) = match conflict_severity {
            "low" => (-0.03, 1.1),
            "medium" => (-0.08, 1.3),
            "high" => (-0.15, 1.5),
            _ => (0.0, 1.0),
        };

        let new_estimate = (interval.point_estimate + point_adj).clamp(0.1, 1.0);
        let new_width = interval.width() * width_mult;

        ConfidenceInterval {
            point_estimate: round4(new_estimate),
            lower_bound: round4((new_estimate - new_width / 2.0).max(0.0)),
            upper_bound: round4((new_estimate + new_width / 2.0).min(1.0)),
            confidence_level: interval.confidence_level,
            method: format!("{}_conflict_adjusted", interval.method),
        }
    }
}
