//! Equity quote adapter.
//!
//! Doubles as the asset-data port for the cross-source orchestrator:
//! shipping/logistics tickers are watched for outsized daily moves, and
//! arbitrary symbols can be priced on demand for correlation checks.

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

/// Watched tickers with reference prices.
const WATCHLIST: &[(&str, f64)] = &[
    ("ZIM", 18.0),
    ("MAERSK-B", 11800.0),
    ("HLAG", 140.0),
    ("SPY", 560.0),
    ("VIX", 15.0),
    ("TLT", 92.0),
    ("DX", 104.0),
];

/// Daily move that produces an event.
const MOVE_THRESHOLD_PCT: f64 = 4.0;

pub struct StockAdapter {
    provider: String,
    guard: SourceGuard,
    /// Last quotes by symbol: (price, change_pct).
    quotes: Mutex<HashMap<String, (f64, f64)>>,
}

impl StockAdapter {
    pub fn new(config: &OmenConfig) -> Self {
        Self {
            provider: config.stock.provider.clone(),
            guard: SourceGuard::new(Source::Stock),
            quotes: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_real(&self) -> bool {
        self.provider != "mock"
    }

    fn refresh_quotes(&self) {
        let mut rng = rand::thread_rng();
        let mut quotes = self.quotes.lock();
        for (symbol, reference) in WATCHLIST {
            let change_pct: f64 = rng.gen_range(-6.0..6.0);
            let price = reference * (1.0 + change_pct / 100.0);
            quotes.insert(symbol.to_string(), (price, change_pct));
        }
    }

    fn move_event(symbol: &str, price: f64, change_pct: f64) -> RawEvent {
        let mut source_metrics = HashMap::new();
        source_metrics.insert("price".to_string(), serde_json::json!(price));
        source_metrics.insert("change_pct".to_string(), serde_json::json!(change_pct));

        let direction = if change_pct >= 0.0 { "up" } else { "down" };
        RawEvent {
            event_id: format!("stock-{}-{}", symbol, Utc::now().format("%Y%m%d")),
            source: Source::Stock,
            source_metrics,
            title: format!("{} moved {} {:.1}% today", symbol, direction, change_pct.abs()),
            description: format!("{} trading at {:.2} after a {:+.1}% session move", symbol, price, change_pct),
            probability: RawEvent::DEFAULT_PROBABILITY,
            keywords: vec!["stocks".to_string(), symbol.to_lowercase()],
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
impl SourceAdapter for StockAdapter {
    fn source(&self) -> Source {
        Source::Stock
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
        Ok(quotes
            .iter()
            .filter(|(_, (_, change_pct))| change_pct.abs() >= MOVE_THRESHOLD_PCT)
            .take(limit)
            .map(|(symbol, (price, change_pct))| Self::move_event(symbol, *price, *change_pct))
            .collect())
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth {
            status: HealthState::Healthy,
            latency_ms: 0.0,
            error: None,
            metadata: serde_json::json!({
                "provider": self.provider,
                "watchlist": WATCHLIST.len(),
            }),
        }
    }
}

#[async_trait]
impl AssetDataPort for StockAdapter {
    async fn latest_price(&self, symbol: &str) -> Option<f64> {
        {
            let quotes = self.quotes.lock();
            if let Some((price, _)) = quotes.get(symbol) {
                return Some(*price);
            }
        }
        // Unknown symbol: quote off the reference table if we track it.
        WATCHLIST
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, reference)| *reference)
    }

    async fn price_change_24h(&self, symbol: &str) -> Option<(f64, f64)> {
        let quotes = self.quotes.lock();
        quotes.get(symbol).map(|(price, change_pct)| {
            let previous = price / (1.0 + change_pct / 100.0);
            (price - previous, *change_pct)
        })
    }
}
