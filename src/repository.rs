//! Signal repository.
//!
//! SQLite-backed store of emitted signals. The ledger remains the source
//! of truth; this table exists for fast API queries and for pipeline
//! dedupe via the unique input-hash index.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::error;

use crate::emitter::EmitResult;
use crate::models::OmenSignal;
use crate::pipeline::SignalStore;

pub struct SignalRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SignalRepository {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id TEXT NOT NULL UNIQUE,
                input_event_hash TEXT NOT NULL UNIQUE,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                emit_status TEXT NOT NULL,
                ledger_partition TEXT,
                confidence_score REAL NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);
            CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at);
            "#,
        )
    }

    pub fn get(&self, signal_id: &str) -> Option<OmenSignal> {
        let payload: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT payload FROM signals WHERE signal_id = ?1",
                params![signal_id],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    /// Signals newest-first with keyset pagination on the rowid.
    /// Returns (items, has_more, next_cursor).
    pub fn page(
        &self,
        limit: usize,
        status: Option<&str>,
        cursor: Option<i64>,
    ) -> (Vec<OmenSignal>, bool, Option<i64>) {
        let conn = self.conn.lock();
        let cursor = cursor.unwrap_or(i64::MAX);
        let fetch = (limit + 1) as i64;

        let mut items: Vec<(i64, OmenSignal)> = Vec::new();
        let result = match status {
            Some(status) => {
                let mut stmt = match conn.prepare(
                    "SELECT id, payload FROM signals
                     WHERE id < ?1 AND status = ?2
                     ORDER BY id DESC LIMIT ?3",
                ) {
                    Ok(stmt) => stmt,
                    Err(_) => return (vec![], false, None),
                };
                stmt.query_map(params![cursor, status, fetch], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map(|rows| rows.flatten().collect::<Vec<_>>())
            }
            None => {
                let mut stmt = match conn.prepare(
                    "SELECT id, payload FROM signals
                     WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
                ) {
                    Ok(stmt) => stmt,
                    Err(_) => return (vec![], false, None),
                };
                stmt.query_map(params![cursor, fetch], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })
                .map(|rows| rows.flatten().collect::<Vec<_>>())
            }
        };

        if let Ok(rows) = result {
            for (id, payload) in rows {
                if let Ok(signal) = serde_json::from_str::<OmenSignal>(&payload) {
                    items.push((id, signal));
                }
            }
        }

        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = if has_more {
            items.last().map(|(id, _)| *id)
        } else {
            None
        };
        (items.into_iter().map(|(_, s)| s).collect(), has_more, next_cursor)
    }

    pub fn recent(&self, limit: usize) -> Vec<OmenSignal> {
        self.page(limit, None, None).0
    }

    pub fn count(&self) -> u64 {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM signals", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as u64
    }
}

impl SignalStore for SignalRepository {
    fn exists_by_input_hash(&self, input_event_hash: &str) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT 1 FROM signals WHERE input_event_hash = ?1",
                params![input_event_hash],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .unwrap_or(false)
    }

    fn store_emitted(&self, signal: &OmenSignal, emit: &EmitResult) {
        let payload = match serde_json::to_string(signal) {
            Ok(payload) => payload,
            Err(err) => {
                error!(signal_id = %signal.signal_id, error = %err, "signal serialize failed");
                return;
            }
        };
        let result = self.conn.lock().execute(
            "INSERT OR IGNORE INTO signals (
                signal_id, input_event_hash, category, status,
                emit_status, ledger_partition, confidence_score, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal.signal_id,
                signal.input_event_hash,
                signal.category.as_str(),
                signal.status.as_str(),
                emit.status.as_str(),
                emit.ledger_partition,
                signal.confidence_score,
                payload,
            ],
        );
        if let Err(err) = result {
            error!(signal_id = %signal.signal_id, error = %err, "signal store failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmitStatus;
    use crate::models::*;
    use chrono::Utc;

    fn signal(id: &str, hash: &str) -> OmenSignal {
        OmenSignal {
            signal_id: id.to_string(),
            source_event_id: "evt".to_string(),
            trace_id: "abcd".to_string(),
            title: "t".to_string(),
            description: String::new(),
            probability: 0.5,
            probability_source: "news".to_string(),
            confidence_score: 0.6,
            confidence_interval: ConfidenceInterval {
                point_estimate: 0.6,
                lower_bound: 0.5,
                upper_bound: 0.7,
                confidence_level: 0.95,
                method: "weighted_bayesian".to_string(),
            },
            confidence_level: ConfidenceLevel::Medium,
            category: SignalCategory::Other,
            signal_type: SignalType::Unclassified,
            status: SignalStatus::Active,
            geographic: GeographicScope::default(),
            temporal: TemporalScope::default(),
            impact_hints: ImpactHints {
                domains: vec![],
                direction: ImpactDirection::Unknown,
                affected_asset_types: vec![],
                keywords: vec![],
            },
            evidence: vec![],
            ruleset_version: "v1".to_string(),
            generated_at: Utc::now(),
            input_event_hash: hash.to_string(),
        }
    }

    fn delivered(id: &str) -> EmitResult {
        EmitResult {
            status: EmitStatus::Delivered,
            signal_id: id.to_string(),
            ledger_partition: Some("2026-08-01".to_string()),
            ack_id: Some("ack".to_string()),
            error: None,
        }
    }

    #[test]
    fn store_and_dedupe_by_input_hash() {
        let repo = SignalRepository::open_in_memory().unwrap();
        assert!(!repo.exists_by_input_hash("h1"));

        repo.store_emitted(&signal("OMEN-1", "h1"), &delivered("OMEN-1"));
        assert!(repo.exists_by_input_hash("h1"));
        assert!(!repo.exists_by_input_hash("h2"));
        assert_eq!(repo.count(), 1);

        // Same hash is silently ignored, not duplicated.
        repo.store_emitted(&signal("OMEN-2", "h1"), &delivered("OMEN-2"));
        assert_eq!(repo.count(), 1);
    }

    #[test]
    fn get_round_trips_payload() {
        let repo = SignalRepository::open_in_memory().unwrap();
        repo.store_emitted(&signal("OMEN-1", "h1"), &delivered("OMEN-1"));
        let loaded = repo.get("OMEN-1").unwrap();
        assert_eq!(loaded.signal_id, "OMEN-1");
        assert_eq!(loaded.confidence_score, 0.6);
        assert!(repo.get("OMEN-404").is_none());
    }

    #[test]
    fn pagination_walks_newest_first() {
        let repo = SignalRepository::open_in_memory().unwrap();
        for i in 0..5 {
            repo.store_emitted(
                &signal(&format!("OMEN-{}", i), &format!("h{}", i)),
                &delivered(&format!("OMEN-{}", i)),
            );
        }

        let (first_page, has_more, cursor) = repo.page(2, None, None);
        assert_eq!(first_page.len(), 2);
        assert!(has_more);
        assert_eq!(first_page[0].signal_id, "OMEN-4");

        let (second_page, _, _) = repo.page(2, None, cursor);
        assert_eq!(second_page[0].signal_id, "OMEN-2");
    }

    #[test]
    fn status_filter_applies() {
        let repo = SignalRepository::open_in_memory().unwrap();
        repo.store_emitted(&signal("OMEN-1", "h1"), &delivered("OMEN-1"));
        let (items, _, _) = repo.page(10, Some("ACTIVE"), None);
        assert_eq!(items.len(), 1);
        let (items, _, _) = repo.page(10, Some("RESOLVED"), None);
        assert!(items.is_empty());
    }
}
