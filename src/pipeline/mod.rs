//! Signal pipeline
//!
//! Orchestrates validate -> enrich -> confidence -> correlate -> persist ->
//! publish for each RawEvent. Rejections and rule errors land in the DLQ;
//! duplicates are dropped via the repository's input-hash index; signals
//! below the output confidence threshold are filtered.

pub mod confidence;
pub mod dlq;
pub mod enricher;
pub mod validator;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::correlation::conflict::ConflictSeverity;
use crate::correlation::fingerprint::FingerprintCache;
use crate::correlation::orchestrator::CrossSourceOrchestrator;
use crate::correlation::trust::SourceTrustManager;
use crate::emitter::{EmitResult, EmitStatus};
use crate::errors::PipelineErrorKind;
use crate::models::{
    deterministic_trace_id, generate_input_event_hash, ConfidenceLevel, Evidence, OmenSignal,
    RawEvent, SignalStatus, ValidatedSignal,
};
use confidence::ConfidenceCalculator;
use dlq::DeadLetterQueue;
use enricher::SignalEnricher;
use validator::{SignalValidator, ValidationContext};

/// Seam to the dual-path emitter so the pipeline can be driven in tests
/// without a downstream.
#[async_trait]
pub trait EmitPort: Send + Sync {
    async fn emit(&self, signal: &OmenSignal, input_event: &RawEvent) -> EmitResult;
}

/// Seam to the signal repository for dedupe and post-emit storage.
pub trait SignalStore: Send + Sync {
    fn exists_by_input_hash(&self, input_event_hash: &str) -> bool;
    fn store_emitted(&self, signal: &OmenSignal, emit: &EmitResult);
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub enable_dedupe: bool,
    pub enable_dlq: bool,
    pub enable_dry_run: bool,
    /// Authoritative: when false the correlation orchestrator never runs.
    pub enable_correlation: bool,
    pub min_confidence_for_output: f64,
    pub ruleset_version: String,
    pub dlq_max_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_dedupe: true,
            enable_dlq: true,
            enable_dry_run: false,
            enable_correlation: true,
            min_confidence_for_output: 0.3,
            ruleset_version: "omen-v1.0.0".to_string(),
            dlq_max_size: 1000,
        }
    }
}

/// Monotonic counters for the stats endpoint.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub processed: AtomicU64,
    pub emitted: AtomicU64,
    pub rejected: AtomicU64,
    pub deduped: AtomicU64,
    pub filtered: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStatsSnapshot {
    pub processed: u64,
    pub emitted: u64,
    pub rejected: u64,
    pub deduped: u64,
    pub filtered: u64,
    pub errors: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            deduped: self.deduped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of processing one event.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub ok: bool,
    pub signals: Vec<OmenSignal>,
    pub emit_results: Vec<EmitResult>,
}

impl ProcessOutcome {
    fn empty_ok() -> Self {
        Self {
            ok: true,
            signals: vec![],
            emit_results: vec![],
        }
    }

    fn failed() -> Self {
        Self {
            ok: false,
            signals: vec![],
            emit_results: vec![],
        }
    }
}

pub struct SignalPipeline {
    config: PipelineConfig,
    validator: SignalValidator,
    enricher: SignalEnricher,
    confidence: ConfidenceCalculator,
    orchestrator: Option<CrossSourceOrchestrator>,
    fingerprint_cache: Arc<FingerprintCache>,
    trust: Arc<SourceTrustManager>,
    emitter: Option<Arc<dyn EmitPort>>,
    store: Option<Arc<dyn SignalStore>>,
    dlq: DeadLetterQueue,
    validation_ctx: ValidationContext,
    /// Recent raw events, fed to the conflict detector as context.
    recent_events: Mutex<VecDeque<RawEvent>>,
    pub stats: PipelineStats,
}

const RECENT_EVENT_WINDOW: usize = 50;

impl SignalPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        fingerprint_cache: Arc<FingerprintCache>,
        trust: Arc<SourceTrustManager>,
        orchestrator: Option<CrossSourceOrchestrator>,
        emitter: Option<Arc<dyn EmitPort>>,
        store: Option<Arc<dyn SignalStore>>,
        min_liquidity_usd: f64,
    ) -> Self {
        let validator = SignalValidator::with_default_rules(config.ruleset_version.clone());
        let validation_ctx =
            ValidationContext::new(fingerprint_cache.clone()).with_min_liquidity(min_liquidity_usd);
        let dlq = DeadLetterQueue::new(config.dlq_max_size);
        Self {
            config,
            validator,
            enricher: SignalEnricher::new(),
            confidence: ConfidenceCalculator::new(),
            orchestrator,
            fingerprint_cache,
            trust,
            emitter,
            store,
            dlq,
            validation_ctx,
            recent_events: Mutex::new(VecDeque::new()),
            stats: PipelineStats::default(),
        }
    }

    pub fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// Process a single raw event end to end.
    pub async fn process_single(&self, event: RawEvent) -> ProcessOutcome {
        self.process_inner(event, self.config.enable_dlq).await
    }

    async fn process_inner(&self, event: RawEvent, allow_dlq: bool) -> ProcessOutcome {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        let input_event_hash = generate_input_event_hash(&event);

        // 1. Dedupe on the input hash.
        if self.config.enable_dedupe {
            if let Some(store) = &self.store {
                if store.exists_by_input_hash(&input_event_hash) {
                    debug!(event_id = %event.event_id, "duplicate input event, skipping");
                    self.stats.deduped.fetch_add(1, Ordering::Relaxed);
                    return ProcessOutcome::empty_ok();
                }
            }
        }

        // Register the fingerprint so later events can corroborate this
        // one, and keep the event in the conflict-detection window.
        self.fingerprint_cache.add(&event);
        {
            let mut recent = self.recent_events.lock();
            if recent.len() >= RECENT_EVENT_WINDOW {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        // 2. Validate.
        let validated = match self.validator.validate(&event, &self.validation_ctx) {
            Ok(validated) => validated,
            Err(rejection) => {
                info!(
                    event_id = %event.event_id,
                    rule = %rejection.rule_name,
                    reason = %rejection.reason,
                    "event rejected by validation"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                if allow_dlq {
                    self.dlq.push(
                        event,
                        PipelineErrorKind::ValidationRejected,
                        Some(rejection.rule_name),
                        rejection.reason,
                    );
                }
                return ProcessOutcome::failed();
            }
        };

        // 3. Enrich & classify.
        let enrichment = self.enricher.enrich(&event);

        // 4. Confidence from validation score, completeness, and trust.
        let reliability = self.trust.trust_weight(event.source.as_str());
        let sample_size = event.market.num_traders;
        let mut interval = self.confidence.calculate_with_interval(
            validated.overall_validation_score,
            event.data_completeness(),
            reliability,
            sample_size,
            0.95,
        );

        // 5. Cross-source correlation (asset confirmation + conflicts).
        let mut evidence: Vec<Evidence> = Vec::new();
        if self.config.enable_correlation {
            if let Some(orchestrator) = &self.orchestrator {
                let additional: Vec<RawEvent> = {
                    let recent = self.recent_events.lock();
                    recent
                        .iter()
                        .filter(|e| e.event_id != event.event_id)
                        .cloned()
                        .collect()
                };
                let correlation = orchestrator.process_signal(&event, &additional).await;

                let max_severity = correlation
                    .conflicts
                    .iter()
                    .filter(|c| c.has_conflict)
                    .map(|c| c.severity)
                    .max_by_key(|s| match s {
                        ConflictSeverity::None => 0,
                        ConflictSeverity::Low => 1,
                        ConflictSeverity::Medium => 2,
                        ConflictSeverity::High => 3,
                    })
                    .unwrap_or(ConflictSeverity::None);

                // Widen for the worst conflict, then apply the combined
                // boost/penalty to the point estimate, floored at 0.1.
                if max_severity != ConflictSeverity::None {
                    let widened = self
                        .confidence
                        .adjust_for_conflicts(&interval, max_severity.as_str());
                    interval.lower_bound = widened.lower_bound;
                    interval.upper_bound = widened.upper_bound;
                    interval.method = widened.method;
                }
                let adjusted = (interval.point_estimate + correlation.confidence_adjustment)
                    .clamp(0.1, 1.0);
                interval.point_estimate = (adjusted * 10_000.0).round() / 10_000.0;
                interval.lower_bound = interval.lower_bound.min(interval.point_estimate);
                interval.upper_bound = interval.upper_bound.max(interval.point_estimate);

                evidence.push(Evidence {
                    source: "cross_source_correlator".to_string(),
                    description: correlation.correlation_summary.clone(),
                    reference: None,
                    observed_at: correlation.triggered_at,
                });
                for conflict in correlation.conflicts.iter().filter(|c| c.has_conflict) {
                    evidence.push(Evidence {
                        source: "conflict_detector".to_string(),
                        description: conflict.description.clone(),
                        reference: None,
                        observed_at: conflict.detected_at,
                    });
                }
            }
        }

        // 6. Output threshold.
        if interval.point_estimate < self.config.min_confidence_for_output {
            debug!(
                event_id = %event.event_id,
                confidence = interval.point_estimate,
                threshold = self.config.min_confidence_for_output,
                "signal below output confidence threshold"
            );
            self.stats.filtered.fetch_add(1, Ordering::Relaxed);
            return ProcessOutcome::empty_ok();
        }

        // 7. Assemble the public contract.
        let signal = self.build_signal(&event, &validated, enrichment, interval, evidence, input_event_hash);

        // 8. Dry run stops before persistence.
        if self.config.enable_dry_run {
            return ProcessOutcome {
                ok: true,
                signals: vec![signal],
                emit_results: vec![],
            };
        }

        let Some(emitter) = &self.emitter else {
            return ProcessOutcome {
                ok: true,
                signals: vec![signal],
                emit_results: vec![],
            };
        };

        let emit_result = emitter.emit(&signal, &event).await;
        match emit_result.status {
            EmitStatus::Failed => {
                warn!(signal_id = %signal.signal_id, "emit failed; event dead-lettered");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                if allow_dlq {
                    self.dlq.push(
                        event,
                        PipelineErrorKind::PersistenceError,
                        None,
                        emit_result.error.clone().unwrap_or_default(),
                    );
                }
                ProcessOutcome {
                    ok: false,
                    signals: vec![signal],
                    emit_results: vec![emit_result],
                }
            }
            _ => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                if let Some(store) = &self.store {
                    store.store_emitted(&signal, &emit_result);
                }
                ProcessOutcome {
                    ok: true,
                    signals: vec![signal],
                    emit_results: vec![emit_result],
                }
            }
        }
    }

    fn build_signal(
        &self,
        event: &RawEvent,
        validated: &ValidatedSignal,
        enrichment: enricher::Enrichment,
        interval: crate::models::ConfidenceInterval,
        mut evidence: Vec<Evidence>,
        input_event_hash: String,
    ) -> OmenSignal {
        for result in &validated.validation_results {
            if result.status == crate::models::ValidationStatus::Passed && result.score > 0.0 {
                evidence.push(Evidence {
                    source: result.rule_name.clone(),
                    description: result.reason.clone(),
                    reference: None,
                    observed_at: Utc::now(),
                });
            }
        }

        OmenSignal {
            signal_id: format!("OMEN-{}", Uuid::new_v4().simple()),
            source_event_id: event.event_id.clone(),
            trace_id: deterministic_trace_id(&event.event_id, event.source),
            title: event.title.clone(),
            description: event.description.clone(),
            probability: event.probability,
            probability_source: event.source.to_string(),
            confidence_score: interval.point_estimate,
            confidence_level: ConfidenceLevel::from_score(interval.point_estimate),
            confidence_interval: interval,
            category: validated.category,
            signal_type: enrichment.signal_type,
            status: SignalStatus::Active,
            geographic: enrichment.geographic,
            temporal: enrichment.temporal,
            impact_hints: enrichment.impact_hints,
            evidence,
            ruleset_version: validated.ruleset_version.clone(),
            generated_at: Utc::now(),
            input_event_hash,
        }
    }

    /// Re-run up to `max_items` dead-lettered events. Successes leave the
    /// queue; failures are re-enqueued at the tail with retry_count + 1.
    /// Returns (succeeded, requeued).
    pub async fn reprocess_dlq(&self, max_items: usize) -> (usize, usize) {
        let entries = self.dlq.drain(max_items);
        let mut succeeded = 0;
        let mut requeued = 0;

        for entry in entries {
            let outcome = self.process_inner(entry.event.clone(), false).await;
            if outcome.ok {
                succeeded += 1;
            } else {
                requeued += 1;
                self.dlq.requeue(entry);
            }
        }

        info!(succeeded, requeued, "DLQ reprocess pass complete");
        (succeeded, requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoLocation, MarketMetadata, SignalCategory, SignalType, Source};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct RecordingEmitter {
        results: Mutex<Vec<String>>,
        status: EmitStatus,
    }

    #[async_trait]
    impl EmitPort for RecordingEmitter {
        async fn emit(&self, signal: &OmenSignal, _input_event: &RawEvent) -> EmitResult {
            self.results.lock().push(signal.signal_id.clone());
            EmitResult {
                status: self.status,
                signal_id: signal.signal_id.clone(),
                ledger_partition: Some("2026-08-01".to_string()),
                ack_id: None,
                error: match self.status {
                    EmitStatus::Failed => Some("disk full".to_string()),
                    _ => None,
                },
            }
        }
    }

    struct MemoryStore {
        hashes: Mutex<Vec<String>>,
    }

    impl SignalStore for MemoryStore {
        fn exists_by_input_hash(&self, input_event_hash: &str) -> bool {
            self.hashes.lock().iter().any(|h| h == input_event_hash)
        }

        fn store_emitted(&self, signal: &OmenSignal, _emit: &EmitResult) {
            self.hashes.lock().push(signal.input_event_hash.clone());
        }
    }

    fn pipeline(
        config: PipelineConfig,
        emitter: Option<Arc<dyn EmitPort>>,
        store: Option<Arc<dyn SignalStore>>,
    ) -> SignalPipeline {
        SignalPipeline::new(
            config,
            Arc::new(FingerprintCache::new(100, 24)),
            Arc::new(SourceTrustManager::new()),
            Some(CrossSourceOrchestrator::new(None)),
            emitter,
            store,
            1000.0,
        )
    }

    fn red_sea_event() -> RawEvent {
        RawEvent {
            event_id: "test-hq-001".to_string(),
            source: Source::Polymarket,
            source_metrics: HashMap::new(),
            title: "Red Sea shipping disruption due to Houthi attacks".to_string(),
            description: "Significant commercial shipping disruption expected".to_string(),
            probability: 0.75,
            keywords: vec![
                "red sea".to_string(),
                "shipping".to_string(),
                "houthi".to_string(),
                "suez".to_string(),
            ],
            inferred_locations: vec![GeoLocation {
                name: "Red Sea".to_string(),
                latitude: 15.5,
                longitude: 42.5,
            }],
            market: MarketMetadata {
                market_id: "test-001".to_string(),
                current_liquidity_usd: Some(75_000.0),
                total_volume_usd: Some(500_000.0),
                num_traders: Some(1200),
                ..Default::default()
            },
            movement: None,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn high_quality_event_emits_geopolitical_signal() {
        let emitter = Arc::new(RecordingEmitter {
            results: Mutex::new(vec![]),
            status: EmitStatus::Delivered,
        });
        let pipeline = pipeline(PipelineConfig::default(), Some(emitter.clone()), None);

        let outcome = pipeline.process_single(red_sea_event()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.signals.len(), 1);

        let signal = &outcome.signals[0];
        assert_eq!(signal.category, SignalCategory::Geopolitical);
        assert_eq!(signal.signal_type, SignalType::GeopoliticalConflict);
        assert!(signal.geographic.chokepoints.contains(&"Red Sea".to_string()));
        assert!(signal
            .geographic
            .chokepoints
            .contains(&"Suez Canal".to_string()));
        assert!(signal.signal_id.starts_with("OMEN-"));
        assert_eq!(signal.confidence_score, signal.confidence_interval.point_estimate);
        assert_eq!(emitter.results.lock().len(), 1);
        assert_eq!(pipeline.stats.snapshot().emitted, 1);
    }

    #[tokio::test]
    async fn low_liquidity_event_goes_to_dlq() {
        let pipeline = pipeline(PipelineConfig::default(), None, None);
        let mut event = red_sea_event();
        event.market.current_liquidity_usd = Some(50.0);

        let outcome = pipeline.process_single(event).await;
        assert!(!outcome.ok);
        assert!(outcome.signals.is_empty());
        assert_eq!(pipeline.dlq().len(), 1);
        let entry = &pipeline.dlq().entries_snapshot()[0];
        assert_eq!(entry.rule_name.as_deref(), Some("liquidity_validation"));
        assert_eq!(pipeline.stats.snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn dedupe_drops_second_occurrence() {
        let store = Arc::new(MemoryStore {
            hashes: Mutex::new(vec![]),
        });
        let emitter = Arc::new(RecordingEmitter {
            results: Mutex::new(vec![]),
            status: EmitStatus::Delivered,
        });
        let pipeline = pipeline(
            PipelineConfig::default(),
            Some(emitter),
            Some(store.clone()),
        );

        let event = red_sea_event();
        let first = pipeline.process_single(event.clone()).await;
        assert_eq!(first.signals.len(), 1);

        let second = pipeline.process_single(event).await;
        assert!(second.ok);
        assert!(second.signals.is_empty());
        assert_eq!(pipeline.stats.snapshot().deduped, 1);
    }

    #[tokio::test]
    async fn dry_run_skips_emission() {
        let emitter = Arc::new(RecordingEmitter {
            results: Mutex::new(vec![]),
            status: EmitStatus::Delivered,
        });
        let config = PipelineConfig {
            enable_dry_run: true,
            ..Default::default()
        };
        let pipeline = pipeline(config, Some(emitter.clone()), None);

        let outcome = pipeline.process_single(red_sea_event()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.signals.len(), 1);
        assert!(outcome.emit_results.is_empty());
        assert!(emitter.results.lock().is_empty());
    }

    #[tokio::test]
    async fn confidence_threshold_filters_output() {
        let config = PipelineConfig {
            min_confidence_for_output: 0.99,
            ..Default::default()
        };
        let pipeline = pipeline(config, None, None);
        let outcome = pipeline.process_single(red_sea_event()).await;
        assert!(outcome.ok);
        assert!(outcome.signals.is_empty());
        assert_eq!(pipeline.stats.snapshot().filtered, 1);
    }

    #[tokio::test]
    async fn failed_emit_dead_letters_event() {
        let emitter = Arc::new(RecordingEmitter {
            results: Mutex::new(vec![]),
            status: EmitStatus::Failed,
        });
        let pipeline = pipeline(PipelineConfig::default(), Some(emitter), None);
        let outcome = pipeline.process_single(red_sea_event()).await;
        assert!(!outcome.ok);
        assert_eq!(pipeline.dlq().len(), 1);
        assert_eq!(
            pipeline.dlq().entries_snapshot()[0].error_kind,
            PipelineErrorKind::PersistenceError
        );
    }

    #[tokio::test]
    async fn reprocess_dlq_requeues_persistent_failures() {
        let pipeline = pipeline(PipelineConfig::default(), None, None);
        let mut event = red_sea_event();
        event.market.current_liquidity_usd = Some(50.0);
        pipeline.process_single(event).await;
        assert_eq!(pipeline.dlq().len(), 1);

        // Liquidity is still too low: the entry must come back with a
        // bumped retry count.
        let (succeeded, requeued) = pipeline.reprocess_dlq(10).await;
        assert_eq!(succeeded, 0);
        assert_eq!(requeued, 1);
        assert_eq!(pipeline.dlq().entries_snapshot()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn forbidden_fields_never_serialize() {
        let pipeline = pipeline(
            PipelineConfig {
                enable_dry_run: true,
                ..Default::default()
            },
            None,
            None,
        );
        let outcome = pipeline.process_single(red_sea_event()).await;
        let json = serde_json::to_string(&outcome.signals[0]).unwrap();
        for forbidden in [
            "risk_status",
            "overall_risk",
            "risk_breakdown",
            "risk_level",
            "risk_score",
            "risk_verdict",
            "recommendation",
            "decision",
            "action_required",
            "alert_level",
            "severity",
            "urgency",
            "is_actionable",
            "delay_days",
            "risk_exposure",
        ] {
            assert!(
                !json.contains(&format!("\"{}\"", forbidden)),
                "forbidden field {} leaked into signal JSON",
                forbidden
            );
        }
    }
}
