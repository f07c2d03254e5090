use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::observability::MetricsRegistry;
use crate::provision::{ProvisioningClient, SequenceSignal};

/// Incremental sync. Asks the provisioning service how far a company can
/// advance from `log_seq`; never touches local state.
#[derive(Clone)]
pub struct SequenceSyncer {
	client: Arc<dyn ProvisioningClient>,
	metrics: Arc<MetricsRegistry>,
}

impl SequenceSyncer {
	pub fn new(client: Arc<dyn ProvisioningClient>, metrics: Arc<MetricsRegistry>) -> Self {
		Self { client, metrics }
	}

	#[tracing::instrument(skip(self))]
	pub async fn sync(&self, company_key: &str, log_seq: Option<i64>) -> Result<Option<SequenceSignal>> {
		info!("Sequence sync: company={} log_seq={:?}", company_key, log_seq);
		self.metrics.sequence_calls_total.inc();

		let signal = self
			.client
			.incremental_changes(company_key, log_seq)
			.await
			.with_context(|| format!("sequence sync failed for {company_key} at {log_seq:?}"))?;

		match &signal {
			Some(s) => debug!(
				"Sequence signal for {}: next={:?} need_snapshot={} targets={:?} continue={}",
				company_key, s.next_log_seq, s.need_snapshot, s.snapshot_targets, s.continue_advancing
			),
			None => debug!("No sequence signal for {}", company_key),
		}
		Ok(signal)
	}
}
