//! News headline adapter.
//!
//! REAL provider queries a NewsData.io-style API for logistics and
//! geopolitics headlines. Every event carries the quality metrics the
//! news quality gate consumes (`credibility_score`, `recency_score`,
//! `combined_score`, `is_duplicate`, `sentiment`) in `source_metrics`.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::OmenConfig;
use crate::errors::AdapterError;
use crate::models::{MarketMetadata, RawEvent, Source};
use crate::sources::{http_client, AdapterHealth, HealthState, SourceAdapter, SourceGuard};

const NEWSDATA_URL: &str = "https://newsdata.io/api/1/news";
const QUERY: &str = "shipping OR \"supply chain\" OR \"red sea\" OR sanctions OR strike";

/// Outlets we consider credible enough to gate high.
const CREDIBLE_DOMAINS: &[&str] = &[
    "reuters.com", "apnews.com", "bloomberg.com", "ft.com", "wsj.com", "bbc.com", "cnbc.com",
    "lloydslist.com", "tradewinds.no",
];

const NEGATIVE_WORDS: &[&str] = &["attack", "crisis", "disruption", "halt", "blocked", "strike", "collapse"];
const POSITIVE_WORDS: &[&str] = &["resume", "agreement", "recovery", "reopen", "eased", "restored"];

pub struct NewsAdapter {
    api_key: Option<String>,
    client: reqwest::Client,
    guard: SourceGuard,
    /// Titles already emitted, for duplicate flagging.
    seen_titles: Mutex<HashSet<String>>,
}

impl NewsAdapter {
    pub fn new(config: &OmenConfig) -> Self {
        Self {
            api_key: config.news.api_key.clone(),
            client: http_client(config.fetch_timeout_secs),
            guard: SourceGuard::new(Source::News),
            seen_titles: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_real(&self) -> bool {
        self.api_key.as_deref().map(|k| k.len() >= 10).unwrap_or(false)
    }

    fn article_event(&self, article: &serde_json::Value) -> Option<RawEvent> {
        let title = article["title"].as_str()?.to_string();
        let description = article["description"].as_str().unwrap_or("").to_string();
        let link = article["link"].as_str().unwrap_or("");
        let source_domain = article["source_id"].as_str().unwrap_or("");

        let published_at = article["pubDate"]
            .as_str()
            .and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z"))
                    .ok()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let credibility = if CREDIBLE_DOMAINS
            .iter()
            .any(|d| link.contains(d) || source_domain.contains(d.trim_end_matches(".com")))
        {
            0.9
        } else {
            0.5
        };

        let age_hours = (Utc::now() - published_at).num_minutes() as f64 / 60.0;
        let recency = (1.0 - age_hours / 48.0).clamp(0.0, 1.0);

        let is_duplicate = !self.seen_titles.lock().insert(title.to_lowercase());

        let text = format!("{} {}", title, description).to_lowercase();
        let neg = NEGATIVE_WORDS.iter().filter(|w| text.contains(*w)).count() as f64;
        let pos = POSITIVE_WORDS.iter().filter(|w| text.contains(*w)).count() as f64;
        let sentiment = if neg + pos > 0.0 {
            (pos - neg) / (pos + neg)
        } else {
            0.0
        };

        let combined = credibility * 0.6 + recency * 0.4;

        let mut source_metrics = HashMap::new();
        source_metrics.insert("credibility_score".to_string(), serde_json::json!(credibility));
        source_metrics.insert("recency_score".to_string(), serde_json::json!(recency));
        source_metrics.insert("combined_score".to_string(), serde_json::json!(combined));
        source_metrics.insert("is_duplicate".to_string(), serde_json::json!(is_duplicate));
        source_metrics.insert("sentiment".to_string(), serde_json::json!(sentiment));

        Some(RawEvent {
            event_id: format!("news-{:x}", md5_like(&title)),
            source: Source::News,
            source_metrics,
            title,
            description,
            probability: RawEvent::DEFAULT_PROBABILITY,
            keywords: extract_keywords(&text),
            inferred_locations: vec![],
            market: MarketMetadata {
                market_id: source_domain.to_string(),
                market_url: if link.is_empty() {
                    None
                } else {
                    Some(link.to_string())
                },
                ..Default::default()
            },
            movement: None,
            observed_at: published_at,
        })
    }

    fn mock_events(&self) -> Vec<RawEvent> {
        let headlines = [
            (
                "Houthi attacks force carriers to reroute around Cape of Good Hope",
                "Major container lines suspended Red Sea transits after renewed attacks.",
            ),
            (
                "Port workers union announces strike vote at US West Coast terminals",
                "Contract negotiations stall ahead of peak season.",
            ),
            (
                "Panama Canal authority eases transit restrictions as water levels recover",
                "Daily slots restored to 34 after months of drought limits.",
            ),
        ];
        headlines
            .iter()
            .filter_map(|(title, description)| {
                self.article_event(&serde_json::json!({
                    "title": title,
                    "description": description,
                    "link": "https://reuters.com/mock",
                    "source_id": "reuters",
                    "pubDate": Utc::now().to_rfc3339(),
                }))
            })
            .collect()
    }
}

fn extract_keywords(text: &str) -> Vec<String> {
    const VOCAB: &[&str] = &[
        "red sea", "shipping", "houthi", "suez", "panama", "strike", "port", "sanction",
        "tariff", "drought", "canal", "supply chain",
    ];
    VOCAB
        .iter()
        .filter(|k| text.contains(*k))
        .map(|k| k.to_string())
        .collect()
}

/// Cheap stable id from a title (not cryptographic).
fn md5_like(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl SourceAdapter for NewsAdapter {
    fn source(&self) -> Source {
        Source::News
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_events(&self, limit: usize) -> Result<Vec<RawEvent>, AdapterError> {
        if !self.is_real() {
            return Ok(self.mock_events().into_iter().take(limit).collect());
        }

        let api_key = self.api_key.clone().unwrap_or_default();
        let client = self.client.clone();
        let body = self
            .guard
            .run(|| {
                let client = client.clone();
                let api_key = api_key.clone();
                async move {
                    let response = client
                        .get(NEWSDATA_URL)
                        .query(&[
                            ("apikey", api_key.as_str()),
                            ("q", QUERY),
                            ("language", "en"),
                        ])
                        .send()
                        .await
                        .map_err(|err| AdapterError::Unavailable {
                            source_name: "news".to_string(),
                            reason: err.to_string(),
                        })?;
                    let status = response.status().as_u16();
                    if status != 200 {
                        return Err(AdapterError::Http {
                            source_name: "news".to_string(),
                            status,
                        });
                    }
                    response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|err| AdapterError::Decode {
                            source_name: "news".to_string(),
                            reason: err.to_string(),
                        })
                }
            })
            .await?;

        let articles = body["results"].as_array().cloned().unwrap_or_default();
        Ok(articles
            .iter()
            .filter_map(|article| self.article_event(article))
            .take(limit)
            .collect())
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth {
            status: HealthState::Healthy,
            latency_ms: 0.0,
            error: None,
            metadata: serde_json::json!({
                "provider": if self.is_real() { "newsdata" } else { "mock" },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> NewsAdapter {
        NewsAdapter {
            api_key: None,
            client: http_client(5),
            guard: SourceGuard::new(Source::News),
            seen_titles: Mutex::new(HashSet::new()),
        }
    }

    #[test]
    fn article_carries_quality_metrics() {
        let adapter = adapter();
        let event = adapter
            .article_event(&serde_json::json!({
                "title": "Houthi attack halts Red Sea shipping",
                "description": "Carriers reroute after the latest attack.",
                "link": "https://reuters.com/article",
                "source_id": "reuters",
                "pubDate": Utc::now().to_rfc3339(),
            }))
            .unwrap();

        assert_eq!(event.source, Source::News);
        assert_eq!(event.probability, RawEvent::DEFAULT_PROBABILITY);
        assert_eq!(event.source_metrics["credibility_score"], serde_json::json!(0.9));
        assert!(event.source_metrics["recency_score"].as_f64().unwrap() > 0.9);
        assert_eq!(event.source_metrics["is_duplicate"], serde_json::json!(false));
        // All-negative wording drives sentiment to -1.
        assert!(event.source_metrics["sentiment"].as_f64().unwrap() < 0.0);
        assert!(event.keywords.contains(&"red sea".to_string()));
    }

    #[test]
    fn repeat_title_is_flagged_duplicate() {
        let adapter = adapter();
        let article = serde_json::json!({
            "title": "Same headline",
            "link": "https://reuters.com/a",
            "source_id": "reuters",
            "pubDate": Utc::now().to_rfc3339(),
        });
        let first = adapter.article_event(&article).unwrap();
        let second = adapter.article_event(&article).unwrap();
        assert_eq!(first.source_metrics["is_duplicate"], serde_json::json!(false));
        assert_eq!(second.source_metrics["is_duplicate"], serde_json::json!(true));
    }

    #[test]
    fn unknown_outlet_gets_lower_credibility() {
        let adapter = adapter();
        let event = adapter
            .article_event(&serde_json::json!({
                "title": "Unverified shipping rumor",
                "link": "https://example-blog.net/post",
                "source_id": "example-blog",
                "pubDate": Utc::now().to_rfc3339(),
            }))
            .unwrap();
        assert_eq!(event.source_metrics["credibility_score"], serde_json::json!(0.5));
    }

    #[tokio::test]
    async fn mock_fetch_returns_bounded_batch() {
        let adapter = adapter();
        let events = adapter.fetch_events(2).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
