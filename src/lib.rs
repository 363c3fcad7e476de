//! OMEN Signal Intelligence Engine
//!
//! Ingests heterogeneous real-world data (prediction markets, AIS vessel
//! tracking, weather, news, freight indices, equities, commodities),
//! turns each event into a neutral, audited signal with calibrated
//! confidence, persists every emission to a crash-safe append-only
//! ledger, and publishes to consumers over HTTP and WebSocket.
//!
//! OMEN is explicitly NOT a decision engine: it never emits verdicts,
//! severity scores, recommendations, or actions.

pub mod api;
pub mod audit;
pub mod config;
pub mod correlation;
pub mod emitter;
pub mod errors;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod realtime;
pub mod repository;
pub mod resilience;
pub mod scheduler;
pub mod sources;
pub mod state;

// Re-export the spine types for binaries and integration tests.
pub use config::OmenConfig;
pub use emitter::{EmitResult, EmitStatus, SignalEmitter};
pub use ledger::{LedgerLifecycleManager, LedgerReader, LedgerWriter};
pub use models::{OmenSignal, RawEvent, SignalEvent};
pub use pipeline::SignalPipeline;
pub use state::AppState;
