//! Cross-source correlation
//!
//! Fingerprint-based event matching, conflict detection between sources,
//! the event-to-asset correlation matrix, source trust scoring, and the
//! orchestrator that ties them together when a signal arrives.

pub mod assets;
pub mod conflict;
pub mod fingerprint;
pub mod orchestrator;
pub mod trust;

pub use assets::{AssetCorrelationMatrix, EventCategory};
pub use conflict::{ConflictDetector, ConflictResult, ConflictSeverity};
pub use fingerprint::{
    global_fingerprint_cache, reset_fingerprint_cache, EventFingerprint, FingerprintCache,
    FingerprintMatch,
};
pub use orchestrator::{
    AssetDataPort, CorrelatedAssetData, CrossSourceCorrelationResult, CrossSourceOrchestrator,
};
pub use trust::{global_trust_manager, reset_trust_manager, SourceTrustManager, SourceTrustScore};
