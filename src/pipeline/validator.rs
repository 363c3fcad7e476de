//! Validation rule chain.
//!
//! A validator holds an ordered list of rules, applied in configuration
//! order. Each rule returns a bounded score in [0,1] with a PASSED,
//! REJECTED_RULE, or SKIPPED status; the first rejection short-circuits
//! the chain. Rules never panic: an internal failure becomes a rejection
//! with an error reason so the event can be dead-lettered with the rule
//! name attached.

use std::sync::Arc;

use chrono::Utc;

use crate::correlation::fingerprint::FingerprintCache;
use crate::models::{
    ExplanationStep, RawEvent, SignalCategory, ValidatedSignal, ValidationResult, ValidationStatus,
};
use crate::pipeline::enricher::SignalEnricher;

/// Shared context handed to every rule.
pub struct ValidationContext {
    pub min_liquidity_usd: f64,
    pub min_volume_usd: f64,
    pub fingerprint_cache: Arc<FingerprintCache>,
    /// Events older than this are considered stale.
    pub max_event_age_hours: i64,
}

impl ValidationContext {
    pub fn new(fingerprint_cache: Arc<FingerprintCache>) -> Self {
        Self {
            min_liquidity_usd: 1000.0,
            min_volume_usd: 100.0,
            fingerprint_cache,
            max_event_age_hours: 72,
        }
    }

    pub fn with_min_liquidity(mut self, min_liquidity_usd: f64) -> Self {
        self.min_liquidity_usd = min_liquidity_usd;
        self
    }
}

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult;
}

/// Convenience constructors for `ValidationResult`, kept out of `ValidationRule`
/// itself (whose generic methods would make it dyn-incompatible) via a blanket
/// impl for every concrete, `Sized` rule type.
trait ValidationRuleHelpers: ValidationRule {
    fn passed(&self, score: f64, reason: impl Into<String>) -> ValidationResult {
        ValidationResult {
            rule_name: self.name().to_string(),
            rule_version: self.version().to_string(),
            status: ValidationStatus::Passed,
            score: score.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }

    fn rejected(&self, reason: impl Into<String>) -> ValidationResult {
        ValidationResult {
            rule_name: self.name().to_string(),
            rule_version: self.version().to_string(),
            status: ValidationStatus::RejectedRule,
            score: 0.0,
            reason: reason.into(),
        }
    }

    fn skipped(&self, reason: impl Into<String>) -> ValidationResult {
        ValidationResult {
            rule_name: self.name().to_string(),
            rule_version: self.version().to_string(),
            status: ValidationStatus::Skipped,
            score: 0.0,
            reason: reason.into(),
        }
    }
}

impl<T: ValidationRule> ValidationRuleHelpers for T {}

// =============================================================================
// RULES
// =============================================================================

/// Rejects markets with liquidity below the configured floor.
pub struct LiquidityValidationRule;

impl ValidationRule for LiquidityValidationRule {
    fn name(&self) -> &'static str {
        "liquidity_validation"
    }

    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult {
        let Some(liquidity) = event.market.current_liquidity_usd else {
            return self.skipped("no liquidity data for this source");
        };
        if liquidity < ctx.min_liquidity_usd {
            return self.rejected(format!(
                "liquidity ${:.0} below minimum ${:.0}",
                liquidity, ctx.min_liquidity_usd
            ));
        }
        let score = liquidity_score(liquidity, ctx.min_liquidity_usd);
        self.passed(score, format!("liquidity ${:.0} acceptable", liquidity))
    }
}

/// Log-scaled liquidity score: the floor maps to 0.5, $1M+ maps to 1.0.
pub fn liquidity_score(liquidity: f64, floor: f64) -> f64 {
    if liquidity <= 0.0 {
        return 0.0;
    }
    let lo = floor.max(1.0).log10();
    let hi = 1_000_000f64.log10();
    let normalized = ((liquidity.log10() - lo) / (hi - lo)).clamp(0.0, 1.0);
    0.5 + normalized * 0.5
}

/// Rejects markets whose traded volume is below a floor.
pub struct VolumeValidationRule;

impl ValidationRule for VolumeValidationRule {
    fn name(&self) -> &'static str {
        "volume_validation"
    }

    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult {
        let Some(volume) = event.market.total_volume_usd else {
            return self.skipped("no volume data for this source");
        };
        if volume < ctx.min_volume_usd {
            return self.rejected(format!(
                "volume ${:.0} below minimum ${:.0}",
                volume, ctx.min_volume_usd
            ));
        }
        let score = (volume / 100_000.0).clamp(0.3, 1.0);
        self.passed(score, format!("volume ${:.0} acceptable", volume))
    }
}

/// Rejects probabilities outside [0,1] or NaN.
pub struct ProbabilityBoundsRule;

impl ValidationRule for ProbabilityBoundsRule {
    fn name(&self) -> &'static str {
        "probability_bounds"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        if event.probability.is_nan() || !(0.0..=1.0).contains(&event.probability) {
            return self.rejected(format!("probability {} out of bounds", event.probability));
        }
        self.passed(1.0, "probability within [0,1]")
    }
}

/// Context-only: larger recent probability moves score higher.
pub struct ProbabilityMovementRule;

impl ValidationRule for ProbabilityMovementRule {
    fn name(&self) -> &'static str {
        "probability_movement"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let Some(movement) = &event.movement else {
            return self.skipped("no movement data");
        };
        let score = (movement.delta.abs() * 5.0).clamp(0.0, 1.0);
        self.passed(
            score,
            format!(
                "probability moved {:+.2} over {}h",
                movement.delta, movement.window_hours
            ),
        )
    }
}

/// Rejects events observed too long ago; older events score lower.
pub struct MarketFreshnessRule;

impl ValidationRule for MarketFreshnessRule {
    fn name(&self) -> &'static str {
        "market_freshness"
    }

    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult {
        let age_hours = (Utc::now() - event.observed_at).num_minutes() as f64 / 60.0;
        if age_hours > ctx.max_event_age_hours as f64 {
            return self.rejected(format!(
                "event observed {:.0}h ago exceeds {}h horizon",
                age_hours, ctx.max_event_age_hours
            ));
        }
        let score = (1.0 - age_hours / ctx.max_event_age_hours as f64).clamp(0.0, 1.0);
        self.passed(score, format!("event {:.1}h old", age_hours.max(0.0)))
    }
}

/// Context-only score from time-to-resolution.
pub struct ResolutionHorizonRule;

impl ValidationRule for ResolutionHorizonRule {
    fn name(&self) -> &'static str {
        "resolution_horizon"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let Some(resolution) = event.market.resolution_date else {
            return self.skipped("no resolution date");
        };
        let days = (resolution - Utc::now()).num_days();
        // Near-term resolutions carry more information than year-out ones.
        let score = match days {
            d if d < 0 => 0.1,
            0..=30 => 1.0,
            31..=90 => 0.8,
            91..=180 => 0.6,
            _ => 0.4,
        };
        self.passed(score, format!("resolves in {} days", days))
    }
}

/// Hit ratio against a logistics/disruption vocabulary.
pub struct KeywordRelevanceRule;

const RELEVANCE_VOCAB: &[&str] = &[
    "shipping", "port", "vessel", "cargo", "freight", "supply", "disruption", "war", "conflict",
    "sanction", "strike", "oil", "gas", "storm", "hurricane", "canal", "strait", "trade",
    "blockade", "congestion",
];

impl ValidationRule for KeywordRelevanceRule {
    fn name(&self) -> &'static str {
        "keyword_relevance"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let text = format!(
            "{} {} {}",
            event.title.to_lowercase(),
            event.description.to_lowercase(),
            event.keywords.join(" ").to_lowercase()
        );
        let hits = RELEVANCE_VOCAB.iter().filter(|k| text.contains(*k)).count();
        let score = (hits as f64 / 4.0).clamp(0.0, 1.0);
        self.passed(score, format!("{} relevance keyword hits", hits))
    }
}

/// Known regions and chokepoints raise the score. Never rejects.
pub struct GeographicRelevanceRule;

const GEO_VOCAB: &[&str] = &[
    "red sea", "suez", "panama", "malacca", "hormuz", "gulf", "strait", "canal", "china",
    "europe", "asia", "yemen", "ukraine",
];

impl ValidationRule for GeographicRelevanceRule {
    fn name(&self) -> &'static str {
        "geographic_relevance"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let mut text = format!("{} {}", event.title, event.description).to_lowercase();
        for location in &event.inferred_locations {
            text.push(' ');
            text.push_str(&location.name.to_lowercase());
        }
        let hits = GEO_VOCAB.iter().filter(|k| text.contains(*k)).count();
        let has_locations = !event.inferred_locations.is_empty();
        let score = if hits > 0 || has_locations {
            (0.6 + hits as f64 * 0.1).clamp(0.0, 1.0)
        } else {
            0.3
        };
        self.passed(score, format!("{} geographic references", hits))
    }
}

/// Confidence boost when other sources corroborate the same fingerprint:
/// 0.2 for a second source, 0.3 for a third, +0.1 keyword-overlap bonus,
/// capped at 0.4.
pub struct CrossSourceCorroborationRule;

impl ValidationRule for CrossSourceCorroborationRule {
    fn name(&self) -> &'static str {
        "cross_source_corroboration"
    }

    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult {
        let matches = ctx
            .fingerprint_cache
            .find_similar(event, 0.7, Some(event.source));
        let sources: std::collections::HashSet<_> = matches.iter().map(|m| m.source).collect();
        let n_sources = sources.len() + 1; // this event's own source included

        if n_sources < 2 {
            return self.passed(0.0, "single source - no cross-validation boost");
        }

        let mut boost: f64 = if n_sources >= 3 { 0.3 } else { 0.2 };
        let keyword_overlap = matches.iter().any(|m| {
            event
                .keywords
                .iter()
                .any(|k| m.title.to_lowercase().contains(&k.to_lowercase()))
        });
        if keyword_overlap {
            boost += 0.1;
        }
        boost = boost.min(0.4);

        let mut names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        self.passed(
            boost,
            format!("confirmed by {} sources: {}", n_sources, names.join(", ")),
        )
    }
}

/// Score from the number of distinct sources seen for this fingerprint.
pub struct SourceDiversityRule;

impl ValidationRule for SourceDiversityRule {
    fn name(&self) -> &'static str {
        "source_diversity"
    }

    fn apply(&self, event: &RawEvent, ctx: &ValidationContext) -> ValidationResult {
        let matches = ctx.fingerprint_cache.find_similar(event, 0.7, None);
        let mut sources: std::collections::HashSet<_> =
            matches.iter().map(|m| m.source).collect();
        sources.insert(event.source);
        let score = match sources.len() {
            0 | 1 => 0.3,
            2 => 0.6,
            3 => 0.8,
            _ => 1.0,
        };
        self.passed(score, format!("{} distinct sources in window", sources.len()))
    }
}

/// Fail-closed quality gate for news events. Non-news passes untouched.
pub struct NewsQualityGateRule;

impl NewsQualityGateRule {
    const MIN_CREDIBILITY: f64 = 0.3;
    const MIN_RECENCY: f64 = 0.1;
    const MIN_COMBINED: f64 = 0.2;

    fn metric(event: &RawEvent, key: &str) -> Option<f64> {
        event.source_metrics.get(key).and_then(|v| v.as_f64())
    }
}

impl ValidationRule for NewsQualityGateRule {
    fn name(&self) -> &'static str {
        "news_quality_gate"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let credibility = Self::metric(event, "credibility_score");
        let recency = Self::metric(event, "recency_score");
        let combined = Self::metric(event, "combined_score");

        // Not a news-shaped event: pass through.
        if credibility.is_none() && recency.is_none() && combined.is_none() {
            return self.passed(1.0, "not a news source signal");
        }

        if let Some(credibility) = credibility {
            if credibility < Self::MIN_CREDIBILITY {
                return self.rejected(format!(
                    "credibility {:.2} below {:.2}",
                    credibility,
                    Self::MIN_CREDIBILITY
                ));
            }
        }
        if let Some(recency) = recency {
            if recency < Self::MIN_RECENCY {
                return self.rejected(format!("stale article: recency {:.2}", recency));
            }
        }
        if event
            .source_metrics
            .get("is_duplicate")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            return self.rejected("duplicate article");
        }
        if let Some(combined) = combined {
            if combined < Self::MIN_COMBINED {
                return self.rejected(format!("combined quality {:.2} too low", combined));
            }
        }

        let score = combined
            .or(credibility)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        self.passed(score, "news quality acceptable")
    }
}

/// Context-only commodity rule: never rejects, boosts on real spikes.
pub struct CommodityContextRule;

impl ValidationRule for CommodityContextRule {
    fn name(&self) -> &'static str {
        "commodity_context"
    }

    fn apply(&self, event: &RawEvent, _ctx: &ValidationContext) -> ValidationResult {
        let is_commodity = event.source_metrics.contains_key("is_spike")
            || event.source_metrics.contains_key("zscore");
        if !is_commodity {
            return self.passed(1.0, "not a commodity signal");
        }

        let is_spike = event
            .source_metrics
            .get("is_spike")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !is_spike {
            return self.passed(0.5, "no significant commodity movement");
        }

        let zscore = event
            .source_metrics
            .get("zscore")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .abs();
        if zscore < 2.0 {
            return self.passed(0.5, "spike below severity threshold");
        }
        let score = (0.5 + (zscore - 2.0) * 0.15).clamp(0.5, 1.0);
        self.passed(score, format!("commodity spike zscore {:.1}", zscore))
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// Outcome of running the chain when the event did not survive it.
#[derive(Debug)]
pub struct ValidationRejection {
    pub rule_name: String,
    pub reason: String,
    pub results: Vec<ValidationResult>,
}

pub struct SignalValidator {
    rules: Vec<Box<dyn ValidationRule>>,
    enricher: SignalEnricher,
    ruleset_version: String,
}

impl SignalValidator {
    /// Explicit ordered rule list; no plugin discovery.
    pub fn new(rules: Vec<Box<dyn ValidationRule>>, ruleset_version: impl Into<String>) -> Self {
        Self {
            rules,
            enricher: SignalEnricher::new(),
            ruleset_version: ruleset_version.into(),
        }
    }

    /// The production chain in configuration order.
    pub fn with_default_rules(ruleset_version: impl Into<String>) -> Self {
        Self::new(
            vec![
                Box::new(LiquidityValidationRule),
                Box::new(VolumeValidationRule),
                Box::new(ProbabilityBoundsRule),
                Box::new(ProbabilityMovementRule),
                Box::new(MarketFreshnessRule),
                Box::new(ResolutionHorizonRule),
                Box::new(KeywordRelevanceRule),
                Box::new(GeographicRelevanceRule),
                Box::new(CrossSourceCorroborationRule),
                Box::new(SourceDiversityRule),
                Box::new(NewsQualityGateRule),
                Box::new(CommodityContextRule),
            ],
            ruleset_version,
        )
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Apply the chain in order; the first REJECTED_RULE terminates
    /// validation without invoking later rules.
    pub fn validate(
        &self,
        event: &RawEvent,
        ctx: &ValidationContext,
    ) -> Result<ValidatedSignal, ValidationRejection> {
        let mut results: Vec<ValidationResult> = Vec::with_capacity(self.rules.len());
        let mut explanation_chain = Vec::new();

        for rule in &self.rules {
            let result = rule.apply(event, ctx);
            let rejected = result.status == ValidationStatus::RejectedRule;

            explanation_chain.push(ExplanationStep {
                step_id: explanation_chain.len(),
                rule_name: result.rule_name.clone(),
                rule_version: result.rule_version.clone(),
                reasoning: result.reason.clone(),
                confidence_contribution: if result.status == ValidationStatus::Passed {
                    result.score
                } else {
                    0.0
                },
                timestamp: Utc::now(),
            });
            results.push(result);

            if rejected {
                let (rule_name, reason) = results
                    .last()
                    .map(|r| (r.rule_name.clone(), r.reason.clone()))
                    .unwrap_or_default();
                return Err(ValidationRejection {
                    rule_name,
                    reason,
                    results,
                });
            }
        }

        let passed: Vec<&ValidationResult> = results
            .iter()
            .filter(|r| r.status == ValidationStatus::Passed)
            .collect();
        let overall_validation_score = if passed.is_empty() {
            0.0
        } else {
            passed.iter().map(|r| r.score).sum::<f64>() / passed.len() as f64
        };

        let liquidity_score = event
            .market
            .current_liquidity_usd
            .map(|l| liquidity_score(l, ctx.min_liquidity_usd))
            .unwrap_or(0.0);

        let signal_strength = (overall_validation_score * 0.5
            + event.probability * 0.3
            + liquidity_score * 0.2)
            .clamp(0.0, 1.0);

        let text = format!("{} {}", event.title, event.description).to_lowercase();
        let category: SignalCategory = self.enricher.classify_signal_type(&text).category();

        Ok(ValidatedSignal {
            event: event.clone(),
            category,
            validation_results: results,
            overall_validation_score,
            liquidity_score,
            signal_strength,
            explanation_chain,
            ruleset_version: self.ruleset_version.clone(),
        })
    }
}
