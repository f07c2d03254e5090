use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use super::cache::CacheInvalidator;
use super::sequence::SequenceSyncer;
use super::snapshot::SnapshotSyncer;
use crate::observability::MetricsRegistry;

/// Where a company's sync loop ended up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
	pub final_log_seq: Option<i64>,
	/// Snapshot branches taken, counted when the branch starts.
	pub snapshot_branches: usize,
}

/// Drives one company from a starting log position until the remote has
/// nothing more to say, switching to snapshot reconciliation when asked.
#[derive(Clone)]
pub struct OrgSyncOrchestrator {
	sequence: SequenceSyncer,
	snapshot: SnapshotSyncer,
	cache: Arc<dyn CacheInvalidator>,
	metrics: Arc<MetricsRegistry>,
}

impl OrgSyncOrchestrator {
	pub fn new(
		sequence: SequenceSyncer,
		snapshot: SnapshotSyncer,
		cache: Arc<dyn CacheInvalidator>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			sequence,
			snapshot,
			cache,
			metrics,
		}
	}

	/// Errors from either syncer propagate. If a snapshot branch started
	/// before the error, the cache is still invalidated.
	#[tracing::instrument(skip(self))]
	pub async fn sync_company(&self, company_key: &str, start_log_seq: Option<i64>) -> Result<SyncOutcome> {
		info!("Org sync start: company={} log_seq={:?}", company_key, start_log_seq);
		let mut outcome = SyncOutcome {
			final_log_seq: start_log_seq,
			snapshot_branches: 0,
		};

		let res = self.advance(company_key, &mut outcome).await;

		if outcome.snapshot_branches > 0 {
			self.metrics.cache_invalidations_total.inc();
			if let Err(e) = self.cache.invalidate_all(company_key).await {
				// invalidation failures never fail the event
				error!("Cache invalidation for {} failed: {:?}", company_key, e);
			}
		}

		res?;
		info!(
			"Org sync done: company={} final_log_seq={:?} snapshots={}",
			company_key, outcome.final_log_seq, outcome.snapshot_branches
		);
		Ok(outcome)
	}

	async fn advance(&self, company_key: &str, outcome: &mut SyncOutcome) -> Result<()> {
		loop {
			let Some(signal) = self.sequence.sync(company_key, outcome.final_log_seq).await? else {
				return Ok(());
			};

			if signal.wants_snapshot() {
				info!("Snapshot required for {}: {:?}", company_key, signal.snapshot_targets);
				outcome.snapshot_branches += 1;
				// a snapshot without a log position keeps the one we had
				outcome.final_log_seq = self
					.snapshot
					.sync(company_key, &signal.snapshot_targets)
					.await?
					.or(outcome.final_log_seq);
				continue;
			}

			outcome.final_log_seq = signal.next_log_seq;
			if !signal.continue_advancing {
				return Ok(());
			}
		}
	}
}
