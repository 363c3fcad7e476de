//! Background scheduling and graceful shutdown.
//!
//! Per-source interval tasks fetch and feed the pipeline; the lifecycle
//! manager and cache expiry run on their own slower cadences. A shutdown
//! signal stops schedulers from starting new fetches, waits out a drain
//! deadline for in-flight work, then flushes the ledger writer and closes
//! the emitter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::correlation::global_fingerprint_cache;
use crate::state::AppState;

const LIFECYCLE_INTERVAL_SECS: u64 = 3600;
const CACHE_SWEEP_INTERVAL_SECS: u64 = 1800;
const DRAIN_DEADLINE_SECS: u64 = 15;

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn all recurring tasks.
    pub fn start(state: Arc<AppState>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        // Ingestion sweep across all adapters.
        {
            let state = state.clone();
            let mut shutdown = shutdown_rx.clone();
            let interval_secs = state.config.fetch_interval_secs;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            let (reports, _) = state.fetch_and_process_all(25).await;
                            let failed = reports.iter().filter(|r| r.status == "error").count();
                            if failed > 0 {
                                warn!(failed, "ingestion sweep had failing sources");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                info!("ingestion scheduler stopped");
            }));
        }

        // Ledger lifecycle: seal -> compress -> archive -> delete.
        {
            let state = state.clone();
            let mut shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(LIFECYCLE_INTERVAL_SECS));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            let report = state.lifecycle.run_lifecycle_tasks(&state.ledger_writer);
                            if !report.errors.is_empty() {
                                warn!(errors = report.errors.len(), "lifecycle pass had errors");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                info!("lifecycle scheduler stopped");
            }));
        }

        // Fingerprint-cache TTL sweep.
        {
            let mut shutdown = shutdown_rx;
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            let expired = global_fingerprint_cache().clear_expired();
                            if expired > 0 {
                                info!(expired, "fingerprint cache sweep");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Graceful shutdown: stop starting new work, drain in-flight tasks
    /// up to the deadline, then flush durable state.
    pub async fn shutdown(self, state: &AppState) {
        info!("shutdown requested, draining in-flight work");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(DRAIN_DEADLINE_SECS), drain)
            .await
            .is_err()
        {
            warn!("drain deadline exceeded; abandoning remaining tasks");
        }

        state.ledger_writer.flush_and_close();
        state.emitter.close();
        info!("shutdown complete");
    }
}
