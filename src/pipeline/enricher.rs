//! Enrichment and classification.
//!
//! Works on title and description text only, never on metadata fields.
//! Assigns a signal type by keyword-pattern hit counts, derives semantic
//! polarity, routing domains, mentioned asset types, and geographic scope
//! (regions + canonical chokepoint names).

use crate::models::{
    AffectedDomain, GeographicScope, ImpactDirection, ImpactHints, RawEvent, SignalCategory,
    SignalType, TemporalScope,
};

/// Keyword patterns per signal type. Highest hit count wins.
const TYPE_PATTERNS: &[(SignalType, &[&str])] = &[
    (
        SignalType::GeopoliticalConflict,
        &["war", "conflict", "attack", "invasion", "military", "missile", "strike", "houthi", "rebel", "drone", "blockade"],
    ),
    (
        SignalType::GeopoliticalSanctions,
        &["sanction", "embargo", "tariff", "trade restriction", "export control"],
    ),
    (
        SignalType::GeopoliticalDiplomatic,
        &["treaty", "summit", "diplomatic", "negotiation", "ceasefire", "agreement"],
    ),
    (
        SignalType::SupplyChainDisruption,
        &["supply chain", "shortage", "disruption", "backlog", "container", "factory closure"],
    ),
    (
        SignalType::ShippingRouteRisk,
        &["shipping", "vessel", "rerout", "strait", "canal", "red sea", "suez", "transit", "chokepoint"],
    ),
    (
        SignalType::PortOperations,
        &["port", "terminal", "congestion", "berth", "dockworker", "anchorage"],
    ),
    (
        SignalType::EnergySupply,
        &["oil", "gas", "crude", "opec", "refinery", "pipeline", "energy price"],
    ),
    (
        SignalType::EnergyInfrastructure,
        &["grid", "power plant", "blackout", "transmission", "substation"],
    ),
    (
        SignalType::LaborDisruption,
        &["strike", "union", "walkout", "labor dispute", "industrial action", "lockout"],
    ),
    (
        SignalType::ClimateEvent,
        &["drought", "heatwave", "el nino", "monsoon", "wildfire", "climate"],
    ),
    (
        SignalType::NaturalDisaster,
        &["hurricane", "typhoon", "earthquake", "flood", "tsunami", "storm", "cyclone", "landslide"],
    ),
    (
        SignalType::RegulatoryChange,
        &["regulation", "ban", "compliance", "ruling", "legislation", "mandate", "policy change"],
    ),
];

/// Signal types that are NEGATIVE by definition.
const ALWAYS_NEGATIVE: &[SignalType] = &[
    SignalType::GeopoliticalConflict,
    SignalType::NaturalDisaster,
    SignalType::LaborDisruption,
    SignalType::SupplyChainDisruption,
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "disruption", "crisis", "attack", "failure", "collapse", "shortage", "delay", "closure",
    "conflict", "damage", "loss", "decline", "crash", "blockade", "outage",
];

const POSITIVE_KEYWORDS: &[&str] = &[
    "resolution", "recovery", "agreement", "reopening", "restored", "improvement", "growth",
    "easing", "stabilize", "breakthrough", "resumed",
];

/// Asset-type vocabulary, excluding tokens that collide with metadata
/// field names ("resolution" stays out).
const ASSET_TYPE_PATTERNS: &[(&str, &[&str])] = &[
    ("crude_oil", &["oil", "crude", "brent", "wti"]),
    ("natural_gas", &["natural gas", "lng"]),
    ("gold", &["gold", "bullion"]),
    ("container_freight", &["container", "freight", "teu"]),
    ("dry_bulk", &["dry bulk", "grain shipment", "iron ore"]),
    ("equities", &["stocks", "equities", "shares"]),
    ("currencies", &["currency", "forex", "exchange rate"]),
    ("agriculture", &["wheat", "corn", "soybean", "rice"]),
];

/// Chokepoint trigger -> canonical name.
const CHOKEPOINTS: &[(&str, &str)] = &[
    ("red sea", "Red Sea"),
    ("suez", "Suez Canal"),
    ("panama", "Panama Canal"),
    ("malacca", "Strait of Malacca"),
    ("hormuz", "Strait of Hormuz"),
    ("bab el-mandeb", "Bab el-Mandeb"),
    ("bab al-mandab", "Bab el-Mandeb"),
    ("bosporus", "Bosporus Strait"),
    ("gibraltar", "Strait of Gibraltar"),
    ("taiwan strait", "Taiwan Strait"),
    ("english channel", "English Channel"),
];

/// Region vocabulary for geographic scope.
const REGIONS: &[(&str, &str)] = &[
    ("middle east", "Middle East"),
    ("yemen", "Middle East"),
    ("iran", "Middle East"),
    ("persian gulf", "Middle East"),
    ("europe", "Europe"),
    ("ukraine", "Europe"),
    ("russia", "Europe"),
    ("asia", "Asia"),
    ("china", "Asia"),
    ("japan", "Asia"),
    ("south china sea", "Asia"),
    ("north america", "North America"),
    ("united states", "North America"),
    ("gulf of mexico", "North America"),
    ("africa", "Africa"),
    ("south america", "South America"),
];

/// Enrichment output consumed by the pipeline when assembling OmenSignal.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub signal_type: SignalType,
    pub category: SignalCategory,
    pub geographic: GeographicScope,
    pub temporal: TemporalScope,
    pub impact_hints: ImpactHints,
}

#[derive(Debug, Clone, Default)]
pub struct SignalEnricher;

impl SignalEnricher {
    pub fn new() -> Self {
        Self
    }

    pub fn enrich(&self, event: &RawEvent) -> Enrichment {
        let text = format!("{} {}", event.title, event.description).to_lowercase();

        let signal_type = self.classify_signal_type(&text);
        let category = signal_type.category();
        let direction = self.direction(signal_type, &text);
        let domains = self.domains_for(signal_type);
        let affected_asset_types = self.asset_types(&text);
        let keywords = self.extract_keywords(&text);
        let geographic = self.geographic_scope(event, &text);

        Enrichment {
            signal_type,
            category,
            geographic,
            temporal: TemporalScope {
                event_horizon: event.market.resolution_date,
                resolution_date: event.market.resolution_date,
            },
            impact_hints: ImpactHints {
                domains,
                direction,
                affected_asset_types,
                keywords,
            },
        }
    }

    /// Sum keyword-pattern hits per type; highest count wins, ties broken
    /// by pattern-table order, zero hits means Unclassified.
    pub fn classify_signal_type(&self, text: &str) -> SignalType {
        let mut best = SignalType::Unclassified;
        let mut best_count = 0usize;
        for (signal_type, patterns) in TYPE_PATTERNS {
            let count = patterns.iter().filter(|p| text.contains(*p)).count();
            if count > best_count {
                best = *signal_type;
                best_count = count;
            }
        }
        best
    }

    /// Certain types are negative by definition; otherwise count keyword
    /// hits on both polarity lists.
    pub fn direction(&self, signal_type: SignalType, text: &str) -> ImpactDirection {
        if ALWAYS_NEGATIVE.contains(&signal_type) {
            return ImpactDirection::Negative;
        }
        let neg = NEGATIVE_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        let pos = POSITIVE_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        if neg > pos {
            ImpactDirection::Negative
        } else if pos > neg {
            ImpactDirection::Positive
        } else if pos > 0 {
            ImpactDirection::Neutral
        } else {
            ImpactDirection::Unknown
        }
    }

    /// Fixed routing lookup from signal type.
    pub fn domains_for(&self, signal_type: SignalType) -> Vec<AffectedDomain> {
        match signal_type {
            SignalType::GeopoliticalConflict | SignalType::GeopoliticalSanctions => vec![
                AffectedDomain::Logistics,
                AffectedDomain::Shipping,
                AffectedDomain::Energy,
                AffectedDomain::Finance,
            ],
            SignalType::GeopoliticalDiplomatic => {
                vec![AffectedDomain::Finance, AffectedDomain::Logistics]
            }
            SignalType::SupplyChainDisruption => vec![
                AffectedDomain::Logistics,
                AffectedDomain::Manufacturing,
                AffectedDomain::Shipping,
            ],
            SignalType::ShippingRouteRisk | SignalType::PortOperations => {
                vec![AffectedDomain::Shipping, AffectedDomain::Logistics]
            }
            SignalType::EnergySupply => vec![AffectedDomain::Energy, AffectedDomain::Finance],
            SignalType::EnergyInfrastructure => {
                vec![AffectedDomain::Energy, AffectedDomain::Infrastructure]
            }
            SignalType::LaborDisruption => vec![
                AffectedDomain::Logistics,
                AffectedDomain::Manufacturing,
            ],
            SignalType::ClimateEvent | SignalType::NaturalDisaster => vec![
                AffectedDomain::Agriculture,
                AffectedDomain::Shipping,
                AffectedDomain::Infrastructure,
            ],
            SignalType::RegulatoryChange => vec![AffectedDomain::Finance],
            SignalType::Unclassified => vec![],
        }
    }

    fn asset_types(&self, text: &str) -> Vec<String> {
        ASSET_TYPE_PATTERNS
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|p| text.contains(p)))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn extract_keywords(&self, text: &str) -> Vec<String> {
        let mut keywords = Vec::new();
        for (_, patterns) in TYPE_PATTERNS {
            for pattern in *patterns {
                if text.contains(pattern) && !keywords.contains(&pattern.to_string()) {
                    keywords.push(pattern.to_string());
                }
            }
        }
        keywords.truncate(10);
        keywords
    }

    fn geographic_scope(&self, event: &RawEvent, text: &str) -> GeographicScope {
        // Search titles, descriptions, explicit keywords, and location names.
        let mut haystack = text.to_string();
        for keyword in &event.keywords {
            haystack.push(' ');
            haystack.push_str(&keyword.to_lowercase());
        }
        for location in &event.inferred_locations {
            haystack.push(' ');
            haystack.push_str(&location.name.to_lowercase());
        }

        let mut chokepoints = Vec::new();
        for (trigger, canonical) in CHOKEPOINTS {
            if haystack.contains(trigger) && !chokepoints.contains(&canonical.to_string()) {
                chokepoints.push(canonical.to_string());
            }
        }

        let mut regions = Vec::new();
        for (trigger, region) in REGIONS {
            if haystack.contains(trigger) && !regions.contains(&region.to_string()) {
                regions.push(region.to_string());
            }
        }
        for location in &event.inferred_locations {
            if !regions.contains(&location.name) && !chokepoints.contains(&location.name) {
                regions.push(location.name.clone());
            }
        }

        GeographicScope { regions, chokepoints }
    }
}
