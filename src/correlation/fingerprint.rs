//! Event fingerprinting for cross-source correlation.
//!
//! Events describing the same underlying situation from different sources
//! should land on the same (or a very similar) fingerprint:
//!
//! - Polymarket: "Red Sea shipping disruption"
//! - News: "Houthi attacks disrupt Red Sea trade"
//! - AIS: "Vessel rerouting in Red Sea"
//!
//! Fingerprint components, joined with `|` then sha256'd to 16 hex chars:
//! 1. normalized title tokens (stop words removed, high-value vocabulary
//!    prioritized, alphabetized)
//! 2. sorted lowercased keywords (up to 5)
//! 3. sorted unique locations (up to 3)
//! 4. UTC date bucket (YYYY-MM-DD)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::models::{RawEvent, Source};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall", "this",
    "that", "these", "those", "it", "its",
];

/// High-value vocabulary for logistics/disruption events.
const HIGH_VALUE_KEYWORDS: &[&str] = &[
    // Geopolitical
    "war", "conflict", "attack", "houthi", "rebel", "military", "missile", "drone", "strike",
    "blockade", "sanction", "tariff",
    // Geographic
    "red sea", "suez", "panama", "malacca", "strait", "canal", "gulf", "china", "russia",
    "ukraine", "iran", "yemen", "asia", "europe",
    // Infrastructure
    "port", "shipping", "vessel", "cargo", "container", "freight", "supply chain", "disruption",
    "delay", "congestion", "closure",
    // Economic
    "oil", "gas", "commodity", "price", "spike", "surge", "crash",
    // Weather
    "storm", "typhoon", "hurricane", "flood", "drought",
];

/// Subset of the high-value vocabulary that names places.
const GEOGRAPHIC_KEYWORDS: &[&str] = &[
    "red sea", "suez", "panama", "malacca", "strait", "canal", "china", "russia", "ukraine",
    "iran", "yemen", "asia", "europe", "gulf",
];

pub struct EventFingerprint;

impl EventFingerprint {
    /// Generate the 16-hex-char fingerprint for an event.
    pub fn generate(event: &RawEvent) -> String {
        let input = [
            Self::normalize_title(&event.title),
            Self::normalize_keywords(&event.keywords),
            Self::normalize_locations(event),
            Self::date_bucket(event.observed_at),
        ]
        .join("|");

        hex::encode(Sha256::digest(input.as_bytes()))[..16].to_string()
    }

    fn normalize_title(title: &str) -> String {
        let clean: String = title
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        let meaningful: Vec<&str> = clean
            .split_whitespace()
            .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
            .collect();

        let high_value: Vec<&str> = meaningful
            .iter()
            .copied()
            .filter(|w| HIGH_VALUE_KEYWORDS.contains(w))
            .collect();

        let selected: Vec<String> = if !high_value.is_empty() {
            let mut picked: Vec<String> = {
                let mut hv: Vec<&str> = high_value.clone();
                hv.sort_unstable();
                hv.dedup();
                hv.into_iter().take(3).map(|s| s.to_string()).collect()
            };
            let hv_set: HashSet<&str> = high_value.into_iter().collect();
            let mut rest: Vec<&str> = meaningful
                .iter()
                .copied()
                .filter(|w| !hv_set.contains(w))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            rest.sort_unstable();
            picked.extend(rest.into_iter().take(2).map(|s| s.to_string()));
            picked
        } else {
            let mut unique: Vec<&str> = meaningful
                .into_iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            unique.sort_unstable();
            unique.into_iter().take(5).map(|s| s.to_string()).collect()
        };

        selected.join(" ")
    }

    fn normalize_keywords(keywords: &[String]) -> String {
        let mut normalized: Vec<String> = keywords
            .iter()
            .map(|k| k.to_lowercase().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        normalized.sort_unstable();
        normalized
            .into_iter()
            .take(5)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn normalize_locations(event: &RawEvent) -> String {
        let mut locations: HashSet<String> = event
            .inferred_locations
            .iter()
            .take(3)
            .map(|loc| loc.name.to_lowercase())
            .collect();

        let title_lower = event.title.to_lowercase();
        for keyword in GEOGRAPHIC_KEYWORDS {
            if title_lower.contains(keyword) {
                locations.insert(keyword.to_string());
            }
        }

        let mut sorted: Vec<String> = locations.into_iter().collect();
        sorted.sort_unstable();
        sorted.into_iter().take(3).collect::<Vec<_>>().join(" ")
    }

    fn date_bucket(observed_at: DateTime<Utc>) -> String {
        observed_at.format("%Y-%m-%d").to_string()
    }

    /// Character-set Jaccard similarity between two fingerprints.
    /// Exactly 1.0 is reserved for identical fingerprints; distinct
    /// fingerprints whose character sets coincide cap just below it.
    pub fn similarity(fp1: &str, fp2: &str) -> f64 {
        if fp1 == fp2 {
            return 1.0;
        }
        if fp1.is_empty() || fp2.is_empty() {
            return 0.0;
        }
        let set1: HashSet<char> = fp1.chars().collect();
        let set2: HashSet<char> = fp2.chars().collect();
        let intersection = set1.intersection(&set2).count();
        let union = set1.union(&set2).count();
        if union == 0 {
            0.0
        } else {
            (intersection as f64 / union as f64).min(0.99)
        }
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// A cached-event match returned from a similarity lookup.
#[derive(Debug, Clone)]
pub struct FingerprintMatch {
    pub event_id: String,
    pub source: Source,
    pub title: String,
    pub similarity: f64,
    pub fingerprint: String,
    pub probability: f64,
}

#[derive(Debug, Clone)]
struct CachedEvent {
    fingerprint: String,
    source: Source,
    title: String,
    probability: f64,
    added_at: DateTime<Utc>,
}

struct CacheInner {
    /// event_id -> info, in insertion order (oldest first) for eviction.
    entries: Vec<(String, CachedEvent)>,
    by_fingerprint: HashMap<String, Vec<String>>,
}

/// In-memory fingerprint cache for cross-source matching.
///
/// Bounded size with insertion-order eviction and a TTL sweep. Safe for
/// concurrent access.
pub struct FingerprintCache {
    max_size: usize,
    ttl_hours: i64,
    inner: Mutex<CacheInner>,
}

impl FingerprintCache {
    pub fn new(max_size: usize, ttl_hours: i64) -> Self {
        Self {
            max_size,
            ttl_hours,
            inner: Mutex::new(CacheInner {
                entries: Vec::new(),
                by_fingerprint: HashMap::new(),
            }),
        }
    }

    /// Add an event and return its fingerprint.
    pub fn add(&self, event: &RawEvent) -> String {
        let fingerprint = EventFingerprint::generate(event);
        let mut inner = self.inner.lock();

        // Re-adding refreshes position (and therefore eviction order).
        if let Some(pos) = inner.entries.iter().position(|(id, _)| id == &event.event_id) {
            let (id, _) = inner.entries.remove(pos);
            Self::unindex(&mut inner.by_fingerprint, &fingerprint, &id);
        }

        inner.entries.push((
            event.event_id.clone(),
            CachedEvent {
                fingerprint: fingerprint.clone(),
                source: event.source,
                title: event.title.clone(),
                probability: event.probability,
                added_at: Utc::now(),
            },
        ));
        inner
            .by_fingerprint
            .entry(fingerprint.clone())
            .or_default()
            .push(event.event_id.clone());

        while inner.entries.len() > self.max_size {
            let (oldest_id, oldest) = inner.entries.remove(0);
            Self::unindex(&mut inner.by_fingerprint, &oldest.fingerprint, &oldest_id);
        }

        fingerprint
    }

    /// Find cached events similar to `event`. Exact fingerprint matches come
    /// first (similarity 1.0), then anything with character-Jaccard
    /// similarity >= `min_similarity`, sorted descending.
    pub fn find_similar(
        &self,
        event: &RawEvent,
        min_similarity: f64,
        exclude_source: Option<Source>,
    ) -> Vec<FingerprintMatch> {
        let fingerprint = EventFingerprint::generate(event);
        let inner = self.inner.lock();
        let mut matches = Vec::new();

        let lookup: HashMap<&String, &CachedEvent> =
            inner.entries.iter().map(|(id, e)| (id, e)).collect();

        if let Some(event_ids) = inner.by_fingerprint.get(&fingerprint) {
            for event_id in event_ids {
                if event_id == &event.event_id {
                    continue;
                }
                let Some(cached) = lookup.get(event_id) else {
                    continue;
                };
                if exclude_source == Some(cached.source) {
                    continue;
                }
                matches.push(FingerprintMatch {
                    event_id: event_id.clone(),
                    source: cached.source,
                    title: cached.title.clone(),
                    similarity: 1.0,
                    fingerprint: fingerprint.clone(),
                    probability: cached.probability,
                });
            }
        }

        for (cached_fp, event_ids) in &inner.by_fingerprint {
            if cached_fp == &fingerprint {
                continue;
            }
            let similarity = EventFingerprint::similarity(&fingerprint, cached_fp);
            if similarity < min_similarity {
                continue;
            }
            for event_id in event_ids {
                if event_id == &event.event_id {
                    continue;
                }
                let Some(cached) = lookup.get(event_id) else {
                    continue;
                };
                if exclude_source == Some(cached.source) {
                    continue;
                }
                matches.push(FingerprintMatch {
                    event_id: event_id.clone(),
                    source: cached.source,
                    title: cached.title.clone(),
                    similarity,
                    fingerprint: cached_fp.clone(),
                    probability: cached.probability,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn clear_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(self.ttl_hours);
        let mut inner = self.inner.lock();
        let expired: Vec<(String, String)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.added_at < cutoff)
            .map(|(id, e)| (id.clone(), e.fingerprint.clone()))
            .collect();
        for (id, fp) in &expired {
            inner.entries.retain(|(eid, _)| eid != id);
            Self::unindex(&mut inner.by_fingerprint, fp, id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.by_fingerprint.clear();
    }

    fn unindex(by_fingerprint: &mut HashMap<String, Vec<String>>, fp: &str, event_id: &str) {
        if let Some(ids) = by_fingerprint.get_mut(fp) {
            ids.retain(|id| id != event_id);
            if ids.is_empty() {
                by_fingerprint.remove(fp);
            }
        }
    }
}

lazy_static! {
    static ref FINGERPRINT_CACHE: Arc<FingerprintCache> =
        Arc::new(FingerprintCache::new(1000, 24));
}

/// Process-wide cache (max 1000 entries, 24h TTL).
pub fn global_fingerprint_cache() -> Arc<FingerprintCache> {
    FINGERPRINT_CACHE.clone()
}

/// Test hook: empty the global cache.
pub fn reset_fingerprint_cache() {
    FINGERPRINT_CACHE.clear();
}
