//! Process-wide application state.
//!
//! Owns every subsystem and wires the seams: adapters feed the pipeline,
//! the pipeline emits through the dual-path emitter into the ledger, emit
//! results land in the repository and audit log, and the broadcaster fans
//! results out to WebSocket clients.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::audit::{AuditLogger, AuditOperation, AuditSourceType};
use crate::config::OmenConfig;
use crate::correlation::orchestrator::{AssetDataPort, CrossSourceOrchestrator};
use crate::correlation::{global_fingerprint_cache, global_trust_manager};
use crate::emitter::{EmitResult, EmitStatus, SignalEmitter};
use crate::ledger::{LedgerLifecycleManager, LedgerReader, LedgerWriter};
use crate::models::{RawEvent, Source};
use crate::pipeline::{PipelineConfig, SignalPipeline};
use crate::realtime::Broadcaster;
use crate::repository::SignalRepository;
use crate::sources::{
    ais::AisAdapter, commodity::CommodityAdapter, freight::FreightAdapter, news::NewsAdapter,
    polymarket::PolymarketAdapter, stock::StockAdapter, weather::WeatherAdapter, SourceAdapter,
    SourceRegistry, SourceType,
};

/// Routes correlation price lookups to the stock or commodity adapter by
/// symbol family.
pub struct MarketDataPort {
    stock: Arc<StockAdapter>,
    commodity: Arc<CommodityAdapter>,
}

impl MarketDataPort {
    pub fn new(stock: Arc<StockAdapter>, commodity: Arc<CommodityAdapter>) -> Self {
        Self { stock, commodity }
    }

    fn is_commodity_symbol(symbol: &str) -> bool {
        const COMMODITIES: &[&str] = &["XAU", "XAG", "CL", "NG", "BRENT", "WTI"];
        COMMODITIES.contains(&symbol)
            || symbol.to_lowercase().contains("oil")
            || symbol.to_lowercase().contains("gas")
    }
}

#[async_trait]
impl AssetDataPort for MarketDataPort {
    async fn latest_price(&self, symbol: &str) -> Option<f64> {
        if Self::is_commodity_symbol(symbol) {
            self.commodity.latest_price(symbol).await
        } else {
            self.stock.latest_price(symbol).await
        }
    }

    async fn price_change_24h(&self, symbol: &str) -> Option<(f64, f64)> {
        if Self::is_commodity_symbol(symbol) {
            self.commodity.price_change_24h(symbol).await
        } else {
            self.stock.price_change_24h(symbol).await
        }
    }
}

/// Per-source outcome of a fetch-and-process sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSweepReport {
    pub source: String,
    pub status: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AppState {
    pub config: OmenConfig,
    pub registry: SourceRegistry,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
    pub pipeline: Arc<SignalPipeline>,
    pub repository: Arc<SignalRepository>,
    pub audit: Arc<AuditLogger>,
    pub broadcaster: Arc<Broadcaster>,
    pub ledger_writer: Arc<LedgerWriter>,
    pub ledger_reader: Arc<LedgerReader>,
    pub lifecycle: Arc<LedgerLifecycleManager>,
    pub emitter: Arc<SignalEmitter>,
    pub prometheus: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn build(config: OmenConfig) -> anyhow::Result<Arc<Self>> {
        let registry = SourceRegistry::from_config(&config);

        let ledger_writer = Arc::new(LedgerWriter::new(&config.ledger_base_path)?);
        let ledger_reader = Arc::new(LedgerReader::new(&config.ledger_base_path));
        let lifecycle = Arc::new(LedgerLifecycleManager::new(
            &config.ledger_base_path,
            config.retention.clone(),
        ));

        let broadcaster = Arc::new(Broadcaster::new());

        let emitter = Arc::new(
            SignalEmitter::new(
                ledger_writer.clone(),
                &config.riskcast_url,
                &config.riskcast_api_key,
            )
            .with_broadcaster(broadcaster.clone())
            .with_explanations_hot_path(config.explanations_hot_path),
        );

        let repository = Arc::new(if config.database_path == ":memory:" {
            SignalRepository::open_in_memory()?
        } else {
            SignalRepository::open(&config.database_path)?
        });

        let audit = Arc::new(if config.database_path == ":memory:" {
            AuditLogger::open_in_memory(config.env)?
        } else {
            AuditLogger::open(format!("{}.audit", config.database_path), config.env)?
        });

        // Stock and commodity serve double duty: ingestion adapters and
        // the asset-data port the correlator prices symbols through.
        let stock = Arc::new(StockAdapter::new(&config));
        let commodity = Arc::new(CommodityAdapter::new(&config));
        let asset_port: Arc<dyn AssetDataPort> =
            Arc::new(MarketDataPort::new(stock.clone(), commodity.clone()));

        let pipeline_config = PipelineConfig {
            enable_correlation: config.enable_correlation,
            min_confidence_for_output: config.min_confidence_for_output,
            ..Default::default()
        };
        let pipeline = Arc::new(SignalPipeline::new(
            pipeline_config,
            global_fingerprint_cache(),
            global_trust_manager(),
            Some(CrossSourceOrchestrator::new(Some(asset_port))),
            Some(emitter.clone()),
            Some(repository.clone()),
            config.min_liquidity_usd,
        ));

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(PolymarketAdapter::new(&config)),
            Arc::new(AisAdapter::new(&config)),
            Arc::new(WeatherAdapter::new(&config)),
            Arc::new(NewsAdapter::new(&config)),
            Arc::new(FreightAdapter::new(&config)),
            stock,
            commodity,
        ];

        // A second recorder install (tests) is fine to ignore.
        let prometheus = PrometheusBuilder::new().install_recorder().ok();

        Ok(Arc::new(Self {
            config,
            registry,
            adapters,
            pipeline,
            repository,
            audit,
            broadcaster,
            ledger_writer,
            ledger_reader,
            lifecycle,
            emitter,
            prometheus,
            started_at: Instant::now(),
        }))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn audit_source_type(&self, source: Source) -> AuditSourceType {
        match self.registry.get(source.as_str()).map(|s| s.source_type) {
            Some(SourceType::Real) => AuditSourceType::Real,
            _ => AuditSourceType::Mock,
        }
    }

    /// Run one event through the pipeline and record audit + attestation
    /// for anything that was persisted. The audit path is best-effort.
    pub async fn process_event(&self, event: RawEvent) -> Vec<EmitResult> {
        let source = event.source;
        let attestation_sample = serde_json::to_vec(&event).unwrap_or_default();
        let outcome = self.pipeline.process_single(event).await;

        for (signal, emit) in outcome.signals.iter().zip(outcome.emit_results.iter()) {
            if emit.status == EmitStatus::Failed {
                continue;
            }
            let source_type = self.audit_source_type(source);
            if let Err(err) = self.audit.attest_signal(
                &signal.signal_id,
                source.as_str(),
                source_type,
                &attestation_sample,
            ) {
                error!(signal_id = %signal.signal_id, error = %err, "attestation failed");
            }
            let new_value = serde_json::to_value(signal).ok();
            if let Err(err) = self.audit.log_operation(
                AuditOperation::Insert,
                "omen",
                "signals",
                &signal.signal_id,
                None,
                new_value.as_ref(),
                Some(&signal.signal_id),
                source_type,
                "pipeline",
                "signal emitted",
                None,
            ) {
                error!(signal_id = %signal.signal_id, error = %err, "audit log failed");
            }
        }
        outcome.emit_results
    }

    /// Fetch from every adapter and push everything through the pipeline.
    /// One source failing never aborts the sweep.
    pub async fn fetch_and_process_all(
        &self,
        limit_per_source: usize,
    ) -> (Vec<SourceSweepReport>, Vec<String>) {
        let mut reports = Vec::new();
        let mut signal_ids = Vec::new();

        for adapter in &self.adapters {
            let source = adapter.source();
            match adapter.fetch_events(limit_per_source).await {
                Ok(events) => {
                    let mut emitted = 0;
                    for event in events {
                        for emit in self.process_event(event).await {
                            if emit.status != EmitStatus::Failed {
                                emitted += 1;
                                signal_ids.push(emit.signal_id.clone());
                            }
                        }
                    }
                    reports.push(SourceSweepReport {
                        source: source.to_string(),
                        status: "ok".to_string(),
                        count: emitted,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "source fetch failed");
                    reports.push(SourceSweepReport {
                        source: source.to_string(),
                        status: "error".to_string(),
                        count: 0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        info!(
            sources = reports.len(),
            signals = signal_ids.len(),
            "fetch sweep complete"
        );
        (reports, signal_ids)
    }
}
