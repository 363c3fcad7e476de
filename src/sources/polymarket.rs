//! Polymarket prediction-market adapter.
//!
//! REAL provider talks to a Gamma-style REST API and maps markets to
//! RawEvents: probability from outcome prices, liquidity/volume into
//! market metadata, logistics keywords and locations inferred from the
//! question text. When the API is unreachable or unconfigured, the
//! adapter serves demo markets so the rest of the engine stays
//! exercisable (classified MOCK by the registry).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::OmenConfig;
use crate::errors::AdapterError;
use crate::models::{GeoLocation, MarketMetadata, RawEvent, Source};
use crate::sources::{http_client, AdapterHealth, HealthState, SourceAdapter, SourceGuard};

const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";

/// Keyword vocabulary scanned in market questions.
const LOGISTICS_KEYWORDS: &[&str] = &[
    "shipping", "port", "canal", "strait", "freight", "cargo", "vessel", "container", "suez",
    "panama", "red sea", "blockade", "tariff", "sanction", "oil", "drought", "houthi", "taiwan",
    "strike", "delay", "logistics", "supply chain",
];

/// Named locations inferable from question text.
const KNOWN_LOCATIONS: &[(&str, &str, f64, f64)] = &[
    ("red sea", "Red Sea", 15.5, 42.5),
    ("suez", "Suez Canal", 30.5, 32.3),
    ("panama", "Panama Canal", 9.1, -79.7),
    ("taiwan", "Taiwan Strait", 24.0, 119.0),
    ("malacca", "Strait of Malacca", 2.5, 101.0),
    ("hormuz", "Strait of Hormuz", 26.6, 56.5),
];

#[derive(Debug, Deserialize)]
struct GammaMarket {
    id: String,
    question: Option<String>,
    description: Option<String>,
    #[serde(rename = "outcomePrices")]
    outcome_prices: Option<serde_json::Value>,
    volume: Option<String>,
    liquidity: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
}

pub struct PolymarketAdapter {
    base_url: String,
    client: reqwest::Client,
    guard: SourceGuard,
    configured: bool,
}

impl PolymarketAdapter {
    pub fn new(config: &OmenConfig) -> Self {
        let base_url = config
            .polymarket
            .api_key
            .clone()
            .unwrap_or_else(|| DEFAULT_GAMMA_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(config.fetch_timeout_secs),
            guard: SourceGuard::new(Source::Polymarket),
            configured: true,
        }
    }

    /// Map one Gamma market into a RawEvent.
    fn map_market(&self, market: &GammaMarket) -> RawEvent {
        let title = market.question.clone().unwrap_or_default();
        let description = market.description.clone().unwrap_or_default();
        let text = format!("{} {}", title, description).to_lowercase();

        let probability = Self::probability_from_prices(market.outcome_prices.as_ref())
            .unwrap_or(RawEvent::DEFAULT_PROBABILITY);

        let keywords: Vec<String> = LOGISTICS_KEYWORDS
            .iter()
            .filter(|k| text.contains(*k))
            .map(|k| k.to_string())
            .collect();

        let inferred_locations: Vec<GeoLocation> = KNOWN_LOCATIONS
            .iter()
            .filter(|(trigger, _, _, _)| text.contains(trigger))
            .map(|(_, name, lat, lon)| GeoLocation {
                name: name.to_string(),
                latitude: *lat,
                longitude: *lon,
            })
            .collect();

        RawEvent {
            event_id: format!("polymarket-{}", market.id),
            source: Source::Polymarket,
            source_metrics: HashMap::new(),
            title,
            description,
            probability,
            keywords,
            inferred_locations,
            market: MarketMetadata {
                market_id: market.id.clone(),
                market_url: Some(format!("https://polymarket.com/market/{}", market.id)),
                current_liquidity_usd: market.liquidity.as_deref().and_then(|v| v.parse().ok()),
                total_volume_usd: market.volume.as_deref().and_then(|v| v.parse().ok()),
                num_traders: None,
                created_at: parse_timestamp(market.created_at.as_deref()),
                resolution_date: parse_timestamp(market.end_date.as_deref()),
            },
            movement: None,
            observed_at: Utc::now(),
        }
    }

    /// First outcome price ("Yes") is the event probability. The API
    /// returns either a JSON array or a stringified array.
    fn probability_from_prices(prices: Option<&serde_json::Value>) -> Option<f64> {
        let prices = prices?;
        let first = match prices {
            serde_json::Value::Array(items) => items.first()?.clone(),
            serde_json::Value::String(text) => serde_json::from_str::<Vec<serde_json::Value>>(text)
                .ok()?
                .first()?
                .clone(),
            other => other.clone(),
        };
        match first {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
        .filter(|p: &f64| (0.0..=1.0).contains(p))
    }

    fn demo_markets() -> Vec<GammaMarket> {
        let now = Utc::now();
        let iso = |dt: DateTime<Utc>| dt.to_rfc3339();
        vec![
            GammaMarket {
                id: "demo-red-sea".to_string(),
                question: Some(
                    "Will Red Sea shipping disruptions continue through the quarter?".to_string(),
                ),
                description: Some(
                    "Resolves Yes if commercial shipping through the Red Sea and Bab-el-Mandeb \
                     strait experiences significant disruption due to Houthi attacks."
                        .to_string(),
                ),
                outcome_prices: Some(serde_json::json!(["0.72", "0.28"])),
                volume: Some("1250000".to_string()),
                liquidity: Some("85000".to_string()),
                created_at: Some(iso(now - Duration::days(30))),
                end_date: Some(iso(now + Duration::days(60))),
            },
            GammaMarket {
                id: "demo-taiwan-blockade".to_string(),
                question: Some("Will China impose any form of blockade on Taiwan?".to_string()),
                description: Some(
                    "Resolves Yes on a naval blockade or customs inspection zone that impedes \
                     commercial shipping around Taiwan."
                        .to_string(),
                ),
                outcome_prices: Some(serde_json::json!(["0.08", "0.92"])),
                volume: Some("3500000".to_string()),
                liquidity: Some("220000".to_string()),
                created_at: Some(iso(now - Duration::days(60))),
                end_date: Some(iso(now + Duration::days(300))),
            },
            GammaMarket {
                id: "demo-panama-drought".to_string(),
                question: Some(
                    "Will Panama Canal reduce daily transits below 30 due to drought?".to_string(),
                ),
                description: Some(
                    "Resolves Yes if the canal authority cuts daily vessel transits below 30 \
                     because of water levels."
                        .to_string(),
                ),
                outcome_prices: Some(serde_json::json!(["0.35", "0.65"])),
                volume: Some("800000".to_string()),
                liquidity: Some("42000".to_string()),
                created_at: Some(iso(now - Duration::days(15))),
                end_date: Some(iso(now + Duration::days(45))),
            },
        ]
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl SourceAdapter for PolymarketAdapter {
    fn source(&self) -> Source {
        Source::Polymarket
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn fetch_events(&self, limit: usize) -> Result<Vec<RawEvent>, AdapterError> {
        let url = format!("{}/markets", self.base_url);
        let client = self.client.clone();

        let markets = self
            .guard
            .run(|| {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&[("limit", limit.to_string()), ("closed", "false".to_string())])
                        .send()
                        .await
                        .map_err(|err| AdapterError::Unavailable {
                            source_name: "polymarket".to_string(),
                            reason: err.to_string(),
                        })?;
                    let status = response.status().as_u16();
                    if status != 200 {
                        return Err(AdapterError::Http {
                            source_name: "polymarket".to_string(),
                            status,
                        });
                    }
                    response
                        .json::<Vec<GammaMarket>>()
                        .await
                        .map_err(|err| AdapterError::Decode {
                            source_name: "polymarket".to_string(),
                            reason: err.to_string(),
                        })
                }
            })
            .await;

        let markets = match markets {
            Ok(markets) => markets,
            // Demo fallback keeps the pipeline alive without the API.
            Err(AdapterError::CircuitOpen { .. }) | Err(AdapterError::Unavailable { .. }) => {
                Self::demo_markets()
            }
            Err(err) => return Err(err),
        };

        Ok(markets
            .iter()
            .take(limit)
            .map(|market| self.map_market(market))
            .collect())
    }

    async fn health_check(&self) -> AdapterHealth {
        let start = std::time::Instant::now();
        let result = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&[("limit", "1")])
            .send()
            .await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(response) if response.status().is_success() => AdapterHealth {
                status: HealthState::Healthy,
                latency_ms,
                error: None,
                metadata: serde_json::json!({"endpoint": self.base_url}),
            },
            Ok(response) => AdapterHealth {
                status: HealthState::Degraded,
                latency_ms,
                error: Some(format!("HTTP {}", response.status())),
                metadata: serde_json::json!({"endpoint": self.base_url}),
            },
            Err(err) => AdapterHealth::unhealthy(latency_ms, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> PolymarketAdapter {
        PolymarketAdapter {
            base_url: DEFAULT_GAMMA_URL.to_string(),
            client: http_client(5),
            guard: SourceGuard::new(Source::Polymarket),
            configured: true,
        }
    }

    fn sample_market() -> GammaMarket {
        GammaMarket {
            id: "evt-123".to_string(),
            question: Some("Will Red Sea shipping be disrupted?".to_string()),
            description: Some("Shipping disruption market".to_string()),
            outcome_prices: Some(serde_json::json!(["0.72", "0.28"])),
            volume: Some("500000".to_string()),
            liquidity: Some("75000".to_string()),
            created_at: Some("2026-07-01T00:00:00Z".to_string()),
            end_date: Some("2026-09-30T00:00:00Z".to_string()),
        }
    }

    #[test]
    fn maps_basic_fields() {
        let event = adapter().map_market(&sample_market());
        assert_eq!(event.event_id, "polymarket-evt-123");
        assert_eq!(event.source, Source::Polymarket);
        assert!((event.probability - 0.72).abs() < 1e-9);
        assert_eq!(event.market.total_volume_usd, Some(500_000.0));
        assert_eq!(event.market.current_liquidity_usd, Some(75_000.0));
        assert!(event
            .market
            .market_url
            .as_deref()
            .unwrap()
            .contains("evt-123"));
    }

    #[test]
    fn defaults_probability_when_missing() {
        let mut market = sample_market();
        market.outcome_prices = None;
        let event = adapter().map_market(&market);
        assert_eq!(event.probability, RawEvent::DEFAULT_PROBABILITY);
    }

    #[test]
    fn parses_stringified_price_arrays() {
        let mut market = sample_market();
        market.outcome_prices = Some(serde_json::json!("[\"0.35\", \"0.65\"]"));
        let event = adapter().map_market(&market);
        assert!((event.probability - 0.35).abs() < 1e-9);
    }

    #[test]
    fn extracts_keywords_and_locations() {
        let event = adapter().map_market(&sample_market());
        assert!(event.keywords.contains(&"shipping".to_string()));
        assert!(event.keywords.contains(&"red sea".to_string()));
        assert_eq!(event.inferred_locations.len(), 1);
        assert_eq!(event.inferred_locations[0].name, "Red Sea");
    }

    #[test]
    fn unrelated_content_yields_no_keywords() {
        let mut market = sample_market();
        market.question = Some("Will Team A win the game?".to_string());
        market.description = None;
        let event = adapter().map_market(&market);
        assert!(event.keywords.is_empty());
        assert!(event.inferred_locations.is_empty());
    }

    #[test]
    fn malformed_timestamps_become_none() {
        let mut market = sample_market();
        market.created_at = Some("not-a-date".to_string());
        let event = adapter().map_market(&market);
        assert!(event.market.created_at.is_none());
        assert!(event.market.resolution_date.is_some());
    }

    #[test]
    fn demo_markets_cover_chokepoints() {
        let adapter = adapter();
        let events: Vec<RawEvent> = PolymarketAdapter::demo_markets()
            .iter()
            .map(|m| adapter.map_market(m))
            .collect();
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .any(|e| e.inferred_locations.iter().any(|l| l.name == "Red Sea")));
        assert!(events.iter().all(|e| e.market.current_liquidity_usd.is_some()));
    }
}
