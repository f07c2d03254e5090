pub mod cache;
pub mod orchestrator;
pub mod sequence;
pub mod snapshot;

pub use cache::{CacheInvalidator, HttpCacheInvalidator, LogCacheInvalidator};
pub use orchestrator::{OrgSyncOrchestrator, SyncOutcome};
pub use sequence::SequenceSyncer;
pub use snapshot::{ReconcileReport, SnapshotSyncer};
