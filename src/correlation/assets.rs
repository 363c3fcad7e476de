//! Event-to-asset correlation matrix.
//!
//! Fixed mapping from event category + event type to the asset symbols
//! worth checking when that event fires:
//!
//! - "War probability 70%" -> gold, oil, dollar index, defense stocks
//! - "Hurricane Category 5" -> oil, natural gas, freight rates
//! - "Rate hike decision" -> USD, stocks, bonds

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Geopolitical,
    Economic,
    Weather,
    Political,
    Market,
    SupplyChain,
}

type CorrelationRow = (EventCategory, &'static str, &'static [&'static str]);

/// event (category, type) -> affected assets, strongest first.
const CORRELATIONS: &[CorrelationRow] = &[
    (EventCategory::Geopolitical, "war", &["XAU", "XAG", "CL", "DX", "VIX", "defense_stocks"]),
    (EventCategory::Geopolitical, "conflict", &["XAU", "CL", "DX", "regional_currencies"]),
    (EventCategory::Geopolitical, "sanctions", &["affected_country_currency", "energy", "commodities", "banks"]),
    (EventCategory::Geopolitical, "tension", &["XAU", "VIX", "safe_haven_currencies"]),
    (EventCategory::Geopolitical, "ceasefire", &["regional_stocks", "energy", "reconstruction_stocks"]),
    (EventCategory::Geopolitical, "diplomatic", &["regional_currencies", "trade_stocks"]),
    (EventCategory::Economic, "rate_hike", &["DX", "SPY", "TLT", "bank_stocks", "growth_stocks"]),
    (EventCategory::Economic, "rate_cut", &["XAU", "growth_stocks", "emerging_markets", "real_estate"]),
    (EventCategory::Economic, "inflation", &["XAU", "TIP", "commodities", "real_estate"]),
    (EventCategory::Economic, "deflation", &["TLT", "bonds", "USD"]),
    (EventCategory::Economic, "gdp_report", &["SPY", "DX", "sector_etfs"]),
    (EventCategory::Economic, "employment", &["SPY", "consumer_stocks", "DX"]),
    (EventCategory::Economic, "recession", &["XAU", "TLT", "utilities", "consumer_staples", "VIX"]),
    (EventCategory::Weather, "hurricane_gulf", &["CL", "NG", "refinery_stocks", "insurance", "utilities"]),
    (EventCategory::Weather, "hurricane_atlantic", &["insurance", "construction", "utilities"]),
    (EventCategory::Weather, "drought", &["corn", "wheat", "soybeans", "water_utilities"]),
    (EventCategory::Weather, "flood", &["agricultural_commodities", "insurance", "construction"]),
    (EventCategory::Weather, "extreme_cold", &["NG", "heating_oil", "utilities"]),
    (EventCategory::Weather, "extreme_heat", &["NG", "utilities", "agricultural_commodities"]),
    (EventCategory::Weather, "typhoon_asia", &["shipping_stocks", "insurance", "regional_markets"]),
    (EventCategory::Political, "election", &["country_currency", "country_stocks", "VIX"]),
    (EventCategory::Political, "regulation", &["affected_sector", "compliance_stocks"]),
    (EventCategory::Political, "tariff", &["affected_commodities", "trade_stocks", "shipping"]),
    (EventCategory::Market, "crash", &["VIX", "XAU", "TLT", "safe_haven_currencies"]),
    (EventCategory::Market, "rally", &["growth_stocks", "risk_assets", "emerging_markets"]),
    (EventCategory::Market, "volatility_spike", &["VIX", "options", "hedging_instruments"]),
    (EventCategory::SupplyChain, "port_congestion", &["shipping_stocks", "freight_rates", "affected_commodities"]),
    (EventCategory::SupplyChain, "canal_blockage", &["shipping_stocks", "CL", "commodities"]),
    (EventCategory::SupplyChain, "chip_shortage", &["semiconductor_stocks", "auto_stocks"]),
    (EventCategory::SupplyChain, "container_shortage", &["shipping_stocks", "freight_rates"]),
];

/// keyword substring -> (category, event type) for automatic detection.
const KEYWORD_MAPPINGS: &[(&str, EventCategory, &str)] = &[
    ("war", EventCategory::Geopolitical, "war"),
    ("invasion", EventCategory::Geopolitical, "war"),
    ("conflict", EventCategory::Geopolitical, "conflict"),
    ("military", EventCategory::Geopolitical, "conflict"),
    ("houthi", EventCategory::Geopolitical, "conflict"),
    ("sanction", EventCategory::Geopolitical, "sanctions"),
    ("tension", EventCategory::Geopolitical, "tension"),
    ("ceasefire", EventCategory::Geopolitical, "ceasefire"),
    ("fed", EventCategory::Economic, "rate_hike"),
    ("rate", EventCategory::Economic, "rate_hike"),
    ("inflation", EventCategory::Economic, "inflation"),
    ("deflation", EventCategory::Economic, "deflation"),
    ("recession", EventCategory::Economic, "recession"),
    ("gdp", EventCategory::Economic, "gdp_report"),
    ("employment", EventCategory::Economic, "employment"),
    ("jobs", EventCategory::Economic, "employment"),
    ("hurricane", EventCategory::Weather, "hurricane_gulf"),
    ("typhoon", EventCategory::Weather, "typhoon_asia"),
    ("storm", EventCategory::Weather, "hurricane_gulf"),
    ("drought", EventCategory::Weather, "drought"),
    ("flood", EventCategory::Weather, "flood"),
    ("heat", EventCategory::Weather, "extreme_heat"),
    ("cold", EventCategory::Weather, "extreme_cold"),
    ("election", EventCategory::Political, "election"),
    ("tariff", EventCategory::Political, "tariff"),
    ("regulation", EventCategory::Political, "regulation"),
    ("crash", EventCategory::Market, "crash"),
    ("rally", EventCategory::Market, "rally"),
    ("volatility", EventCategory::Market, "volatility_spike"),
    ("congestion", EventCategory::SupplyChain, "port_congestion"),
    ("shortage", EventCategory::SupplyChain, "container_shortage"),
    ("blockage", EventCategory::SupplyChain, "canal_blockage"),
];

pub struct AssetCorrelationMatrix;

impl AssetCorrelationMatrix {
    /// Assets correlated with a specific event type, strongest first.
    pub fn correlated_assets(category: EventCategory, event_type: &str) -> Vec<&'static str> {
        CORRELATIONS
            .iter()
            .find(|(cat, ty, _)| *cat == category && *ty == event_type)
            .map(|(_, _, assets)| assets.to_vec())
            .unwrap_or_default()
    }

    /// Suggest assets for a set of event keywords. Each keyword resolves to
    /// at most one (category, type) pairing, first mapping wins.
    pub fn suggest_assets_to_check(keywords: &[String]) -> Vec<(String, Vec<&'static str>)> {
        let mut suggestions = Vec::new();
        for keyword in keywords {
            let keyword_lower = keyword.to_lowercase();
            for (needle, category, event_type) in KEYWORD_MAPPINGS {
                if keyword_lower.contains(needle) {
                    let assets = Self::correlated_assets(*category, event_type);
                    if !assets.is_empty() {
                        suggestions.push((keyword.clone(), assets));
                    }
                    break;
                }
            }
        }
        suggestions
    }

    /// Correlation strength of an asset for an event type, by list
    /// position: first asset 1.0, last 0.5, 0.0 if absent.
    pub fn correlation_strength(category: EventCategory, event_type: &str, asset: &str) -> f64 {
        let assets = Self::correlated_assets(category, event_type);
        match assets.iter().position(|a| *a == asset) {
            Some(position) => 1.0 - (position as f64 / assets.len() as f64) * 0.5,
            None => 0.0,
        }
    }

    /// Strongest correlation of an asset across all keyword-mapped event
    /// types found in `keywords`. Defaults to 0.5 when nothing matches.
    pub fn strength_for_keywords(asset: &str, keywords: &[String]) -> f64 {
        let mut max_strength: f64 = 0.0;
        for keyword in keywords {
            let keyword_lower = keyword.to_lowercase();
            for (needle, category, event_type) in KEYWORD_MAPPINGS {
                if keyword_lower.contains(needle) {
                    let strength = Self::correlation_strength(*category, event_type, asset);
                    max_strength = max_strength.max(strength);
                }
            }
        }
        if max_strength > 0.0 {
            max_strength
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn war_maps_to_safe_havens() {
        let assets = AssetCorrelationMatrix::correlated_assets(EventCategory::Geopolitical, "war");
        assert_eq!(assets[0], "XAU");
        assert!(assets.contains(&"CL"));
        assert!(assets.contains(&"defense_stocks"));
    }

    #[test]
    fn unknown_event_type_is_empty() {
        assert!(
            AssetCorrelationMatrix::correlated_assets(EventCategory::Weather, "earthquake")
                .is_empty()
        );
    }

    #[test]
    fn keyword_suggestions_resolve_once_per_keyword() {
        let suggestions = AssetCorrelationMatrix::suggest_assets_to_check(&[
            "war".to_string(),
            "russia".to_string(),
        ]);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].0, "war");
        assert_eq!(suggestions[0].1[0], "XAU");
    }

    #[test]
    fn strength_decays_by_position() {
        let first =
            AssetCorrelationMatrix::correlation_strength(EventCategory::Geopolitical, "war", "XAU");
        let last = AssetCorrelationMatrix::correlation_strength(
            EventCategory::Geopolitical,
            "war",
            "defense_stocks",
        );
        assert_eq!(first, 1.0);
        assert!(last < first && last >= 0.5);
        assert_eq!(
            AssetCorrelationMatrix::correlation_strength(
                EventCategory::Geopolitical,
                "war",
                "DOGE"
            ),
            0.0
        );
    }

    #[test]
    fn keyword_strength_defaults_to_medium() {
        let strength =
            AssetCorrelationMatrix::strength_for_keywords("XAU", &["gardening".to_string()]);
        assert_eq!(strength, 0.5);
        let strong = AssetCorrelationMatrix::strength_for_keywords("XAU", &["war".to_string()]);
        assert_eq!(strong, 1.0);
    }
}
