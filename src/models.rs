//! OMEN domain model
//!
//! Immutable stages of a signal's life:
//! RawEvent -> ValidatedSignal -> OmenSignal -> SignalEvent (ledger record).
//!
//! OMEN is a signal intelligence engine, not a decision engine. The public
//! contract (OmenSignal) carries classification, confidence, and routing
//! hints only. Severity scores, verdicts, and recommendations are the
//! responsibility of downstream consumers and must never appear here.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// SOURCES
// =============================================================================

/// Configured ingestion sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Polymarket,
    Ais,
    Weather,
    News,
    Freight,
    Stock,
    Commodity,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Polymarket => "polymarket",
            Source::Ais => "ais",
            Source::Weather => "weather",
            Source::News => "news",
            Source::Freight => "freight",
            Source::Stock => "stock",
            Source::Commodity => "commodity",
        }
    }

    pub fn all() -> &'static [Source] {
        &[
            Source::Polymarket,
            Source::Ais,
            Source::Weather,
            Source::News,
            Source::Freight,
            Source::Stock,
            Source::Commodity,
        ]
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RAW EVENT
// =============================================================================

/// Named geographic point inferred from source data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Source-side market metadata. Fields are optional because not every
/// source is a market (AIS, weather, news carry none of the trading fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub market_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_liquidity_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_volume_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_traders: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_date: Option<DateTime<Utc>>,
}

/// Probability movement over a recent window (market sources only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProbabilityMovement {
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub window_hours: u32,
}

/// Source-neutral ingestion record. Immutable once constructed; owned by
/// the adapter that produced it and moved into the pipeline by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Unique within the source.
    pub event_id: String,
    pub source: Source,
    /// Source-specific fields the pipeline passes through untouched
    /// (news credibility scores, commodity spike flags, vessel counts, ...).
    #[serde(default)]
    pub source_metrics: HashMap<String, serde_json::Value>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Event probability in [0,1]; 0.5 when the source does not provide one.
    pub probability: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub inferred_locations: Vec<GeoLocation>,
    pub market: MarketMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement: Option<ProbabilityMovement>,
    pub observed_at: DateTime<Utc>,
}

impl RawEvent {
    /// Probability fallback used when a source has no native probability.
    pub const DEFAULT_PROBABILITY: f64 = 0.5;

    /// Fraction of optional fields that are present. A semantically
    /// meaningful zero counts as present; only a missing value counts
    /// against completeness.
    pub fn data_completeness(&self) -> f64 {
        let checks = [
            !self.description.is_empty(),
            !self.keywords.is_empty(),
            !self.inferred_locations.is_empty(),
            self.market.current_liquidity_usd.is_some(),
            self.market.total_volume_usd.is_some(),
            self.market.created_at.is_some(),
            self.market.resolution_date.is_some(),
            self.movement.is_some(),
        ];
        let filled = checks.iter().filter(|c| **c).count();
        filled as f64 / checks.len() as f64
    }
}

/// Canonical JSON (lexicographically sorted keys at every level).
pub fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonical_json(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonical_json).collect())
        }
        other => other.clone(),
    }
}

/// Hex sha256 of the canonical JSON encoding of the input event.
pub fn generate_input_event_hash(event: &RawEvent) -> String {
    let value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let canonical = canonical_json(&value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Deterministic trace id: first 16 hex chars of sha256(event_id|source).
pub fn deterministic_trace_id(event_id: &str, source: Source) -> String {
    let digest = Sha256::digest(format!("{}|{}", event_id, source.as_str()).as_bytes());
    hex::encode(digest)[..16].to_string()
}

// =============================================================================
// CLASSIFICATION ENUMS
// =============================================================================

/// Broad signal category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalCategory {
    Geopolitical,
    Infrastructure,
    Climate,
    Economic,
    Regulatory,
    Other,
}

impl SignalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalCategory::Geopolitical => "GEOPOLITICAL",
            SignalCategory::Infrastructure => "INFRASTRUCTURE",
            SignalCategory::Climate => "CLIMATE",
            SignalCategory::Economic => "ECONOMIC",
            SignalCategory::Regulatory => "REGULATORY",
            SignalCategory::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical classification: WHAT TYPE of event, not how severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    GeopoliticalConflict,
    GeopoliticalSanctions,
    GeopoliticalDiplomatic,
    SupplyChainDisruption,
    ShippingRouteRisk,
    PortOperations,
    EnergySupply,
    EnergyInfrastructure,
    LaborDisruption,
    ClimateEvent,
    NaturalDisaster,
    RegulatoryChange,
    Unclassified,
}

impl SignalType {
    pub fn category(&self) -> SignalCategory {
        match self {
            SignalType::GeopoliticalConflict
            | SignalType::GeopoliticalSanctions
            | SignalType::GeopoliticalDiplomatic => SignalCategory::Geopolitical,
            SignalType::SupplyChainDisruption
            | SignalType::ShippingRouteRisk
            | SignalType::PortOperations
            | SignalType::EnergyInfrastructure => SignalCategory::Infrastructure,
            SignalType::ClimateEvent | SignalType::NaturalDisaster => SignalCategory::Climate,
            SignalType::EnergySupply | SignalType::LaborDisruption => SignalCategory::Economic,
            SignalType::RegulatoryChange => SignalCategory::Regulatory,
            SignalType::Unclassified => SignalCategory::Other,
        }
    }
}

/// Lifecycle state: WHERE in lifecycle, not what action to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Candidate,
    Active,
    Monitoring,
    Degraded,
    Resolved,
    Invalidated,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Candidate => "CANDIDATE",
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Monitoring => "MONITORING",
            SignalStatus::Degraded => "DEGRADED",
            SignalStatus::Resolved => "RESOLVED",
            SignalStatus::Invalidated => "INVALIDATED",
        }
    }
}

/// Semantic polarity from text analysis. Sentiment, not severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactDirection {
    Negative,
    Positive,
    Neutral,
    Unknown,
}

/// Domains a signal should be routed to. Routing, not impact scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffectedDomain {
    Logistics,
    Shipping,
    Energy,
    Finance,
    Manufacturing,
    Agriculture,
    Infrastructure,
}

/// Confidence bucket derived from the point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            ConfidenceLevel::High
        } else if score >= 0.4 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Trust classification for data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Untrusted,
    Low,
    Medium,
    High,
    Authoritative,
}

impl TrustLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            TrustLevel::Authoritative
        } else if score >= 0.7 {
            TrustLevel::High
        } else if score >= 0.5 {
            TrustLevel::Medium
        } else if score >= 0.3 {
            TrustLevel::Low
        } else {
            TrustLevel::Untrusted
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Passed,
    RejectedRule,
    Skipped,
}

/// Outcome of a single validation rule. Scores are bounded [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_name: String,
    pub rule_version: String,
    pub status: ValidationStatus,
    pub score: f64,
    pub reason: String,
}

/// One step of the explanation chain. Steps reference each other by index
/// only; there are no back-pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationStep {
    pub step_id: usize,
    pub rule_name: String,
    pub rule_version: String,
    pub reasoning: String,
    pub confidence_contribution: f64,
    pub timestamp: DateTime<Utc>,
}

/// A RawEvent that passed the validator chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSignal {
    pub event: RawEvent,
    pub category: SignalCategory,
    pub validation_results: Vec<ValidationResult>,
    pub overall_validation_score: f64,
    pub liquidity_score: f64,
    pub signal_strength: f64,
    pub explanation_chain: Vec<ExplanationStep>,
    pub ruleset_version: String,
}

// =============================================================================
// CONFIDENCE
// =============================================================================

/// Confidence interval around the point estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub confidence_level: f64,
    pub method: String,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }

    /// Reasonably precise means width under 0.2.
    pub fn is_precise(&self) -> bool {
        self.width() < 0.2
    }
}

// =============================================================================
// OMEN SIGNAL (public contract)
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeographicScope {
    pub regions: Vec<String>,
    pub chokepoints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_horizon: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_date: Option<DateTime<Utc>>,
}

/// Routing metadata for downstream systems. NOT impact assessment:
/// no severity, no delay estimates, no cost, no recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactHints {
    pub domains: Vec<AffectedDomain>,
    pub direction: ImpactDirection,
    pub affected_asset_types: Vec<String>,
    pub keywords: Vec<String>,
}

/// A piece of supporting evidence attached to a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// The enriched, confidence-scored public contract.
///
/// Invariant: this type must never grow severity, urgency, is_actionable,
/// delay_days, risk_exposure, recommendation, action, or alert_level fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmenSignal {
    pub signal_id: String,
    pub source_event_id: String,
    pub trace_id: String,
    pub title: String,
    pub description: String,
    pub probability: f64,
    pub probability_source: String,
    pub confidence_score: f64,
    pub confidence_interval: ConfidenceInterval,
    pub confidence_level: ConfidenceLevel,
    pub category: SignalCategory,
    pub signal_type: SignalType,
    pub status: SignalStatus,
    pub geographic: GeographicScope,
    pub temporal: TemporalScope,
    pub impact_hints: ImpactHints,
    pub evidence: Vec<Evidence>,
    pub ruleset_version: String,
    pub generated_at: DateTime<Utc>,
    pub input_event_hash: String,
}

// =============================================================================
// SIGNAL EVENT (ledger record)
// =============================================================================

/// Ledger record: an OmenSignal plus emission and placement metadata.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal: OmenSignal,
    pub signal_id: String,
    pub input_event_hash: String,
    pub observed_at: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_written_at: Option<DateTime<Utc>>,
}

impl SignalEvent {
    pub fn from_omen_signal(
        signal: OmenSignal,
        input_event_hash: String,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let signal_id = signal.signal_id.clone();
        Self {
            signal,
            signal_id,
            input_event_hash,
            observed_at,
            emitted_at: Utc::now(),
            ledger_partition: None,
            ledger_sequence: None,
            ledger_written_at: None,
        }
    }

    pub fn with_ledger_metadata(mut self, partition: String, sequence: u64) -> Self {
        self.ledger_partition = Some(partition);
        self.ledger_sequence = Some(sequence);
        self.ledger_written_at = Some(Utc::now());
        self
    }

    pub fn deterministic_trace_id(&self) -> &str {
        &self.signal.trace_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> RawEvent {
        RawEvent {
            event_id: "evt-1".to_string(),
            source: Source::Polymarket,
            source_metrics: HashMap::new(),
            title: "Red Sea shipping disruption".to_string(),
            description: "Commercial shipping disruption expected".to_string(),
            probability: 0.75,
            keywords: vec!["red sea".to_string(), "shipping".to_string()],
            inferred_locations: vec![GeoLocation {
                name: "Red Sea".to_string(),
                latitude: 15.5,
                longitude: 42.5,
            }],
            market: MarketMetadata {
                market_id: "mkt-1".to_string(),
                current_liquidity_usd: Some(75_000.0),
                total_volume_usd: Some(500_000.0),
                ..Default::default()
            },
            movement: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn input_event_hash_is_deterministic() {
        let event = sample_event();
        let a = generate_input_event_hash(&event);
        let b = generate_input_event_hash(&event);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn input_event_hash_changes_with_content() {
        let event = sample_event();
        let mut other = event.clone();
        other.probability = 0.5;
        assert_ne!(
            generate_input_event_hash(&event),
            generate_input_event_hash(&other)
        );
    }

    #[test]
    fn trace_id_is_deterministic_and_short() {
        let a = deterministic_trace_id("evt-1", Source::Polymarket);
        let b = deterministic_trace_id("evt-1", Source::Polymarket);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, deterministic_trace_id("evt-1", Source::News));
    }

    #[test]
    fn confidence_level_buckets() {
        assert_eq!(ConfidenceLevel::from_score(0.85), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::Low);
    }

    #[test]
    fn trust_level_buckets() {
        assert_eq!(TrustLevel::from_score(0.95), TrustLevel::Authoritative);
        assert_eq!(TrustLevel::from_score(0.75), TrustLevel::High);
        assert_eq!(TrustLevel::from_score(0.55), TrustLevel::Medium);
        assert_eq!(TrustLevel::from_score(0.35), TrustLevel::Low);
        assert_eq!(TrustLevel::from_score(0.1), TrustLevel::Untrusted);
    }

    #[test]
    fn completeness_counts_only_missing_fields() {
        let event = sample_event();
        // description, keywords, locations, liquidity, volume present (5/8)
        let c = event.data_completeness();
        assert!((c - 0.625).abs() < 1e-9);

        let mut zeroed = event.clone();
        zeroed.market.total_volume_usd = Some(0.0);
        // Meaningful zero still counts as present.
        assert!((zeroed.data_completeness() - 0.625).abs() < 1e-9);
    }

    #[test]
    fn signal_event_serializes_without_absent_ledger_fields() {
        let event = sample_event();
        let hash = generate_input_event_hash(&event);
        let signal = OmenSignal {
            signal_id: "OMEN-TEST".to_string(),
            source_event_id: event.event_id.clone(),
            trace_id: deterministic_trace_id(&event.event_id, event.source),
            title: event.title.clone(),
            description: event.description.clone(),
            probability: event.probability,
            probability_source: event.source.to_string(),
            confidence_score: 0.8,
            confidence_interval: ConfidenceInterval {
                point_estimate: 0.8,
                lower_bound: 0.7,
                upper_bound: 0.9,
                confidence_level: 0.95,
                method: "weighted_bayesian".to_string(),
            },
            confidence_level: ConfidenceLevel::High,
            category: SignalCategory::Geopolitical,
            signal_type: SignalType::GeopoliticalConflict,
            status: SignalStatus::Active,
            geographic: GeographicScope::default(),
            temporal: TemporalScope::default(),
            impact_hints: ImpactHints {
                domains: vec![AffectedDomain::Shipping],
                direction: ImpactDirection::Negative,
                affected_asset_types: vec![],
                keywords: vec![],
            },
            evidence: vec![],
            ruleset_version: "v1.0.0".to_string(),
            generated_at: Utc::now(),
            input_event_hash: hash.clone(),
        };
        let record = SignalEvent::from_omen_signal(signal, hash, event.observed_at);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("ledger_partition"));
        let record = record.with_ledger_metadata("2026-08-01".to_string(), (1u64 << 32) | 1);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("ledger_partition"));
    }
}
