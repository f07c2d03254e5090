use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use log::warn;

use super::{EventLedger, EventStatus, SyncEvent, SyncFailureLog, TriggerOutcome};

/// In-process ledger with the same semantics as the Postgres one, including
/// `(company_key, log_seq)` uniqueness where two missing sequences collide.
#[derive(Default)]
pub struct MemoryLedger {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	events: Vec<SyncEvent>,
	failures: Vec<SyncFailureLog>,
	next_event_id: i64,
	next_failure_id: i64,
}

impl MemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
		self.inner
			.lock()
			.map_err(|_| anyhow!("memory ledger mutex poisoned"))
	}

	/// Snapshot of every entry, in insertion order.
	pub fn events(&self) -> Vec<SyncEvent> {
		self.lock().map(|g| g.events.clone()).unwrap_or_default()
	}

	/// Snapshot of every failure log entry, in insertion order.
	pub fn failures(&self) -> Vec<SyncFailureLog> {
		self.lock().map(|g| g.failures.clone()).unwrap_or_default()
	}
}

#[async_trait]
impl EventLedger for MemoryLedger {
	async fn record_trigger(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
	) -> Result<TriggerOutcome> {
		let mut g = self.lock()?;
		if g
			.events
			.iter()
			.any(|e| e.company_key == company_key && e.log_seq == log_seq)
		{
			warn!(
				"Duplicate sync trigger ignored: company={} log_seq={:?}",
				company_key, log_seq
			);
			return Ok(TriggerOutcome::Duplicate);
		}

		g.next_event_id += 1;
		let id = g.next_event_id;
		let now = Utc::now();
		g.events.push(SyncEvent {
			id,
			company_key: company_key.to_string(),
			log_seq,
			status: EventStatus::Pending,
			retry_count: 0,
			created_at: now,
			updated_at: now,
		});
		Ok(TriggerOutcome::Recorded(id))
	}

	async fn find_oldest_waiting_company(&self, skip: &[String]) -> Result<Option<String>> {
		let g = self.lock()?;
		let mut oldest: Option<&SyncEvent> = None;
		let waiting = g
			.events
			.iter()
			.filter(|e| e.status == EventStatus::Pending && !skip.contains(&e.company_key));
		for e in waiting {
			oldest = match oldest {
				Some(o) if (o.updated_at, o.id) <= (e.updated_at, e.id) => Some(o),
				_ => Some(e),
			};
		}
		Ok(oldest.map(|e| e.company_key.clone()))
	}

	async fn fetch_pending_batch(&self, company_key: &str, limit: i64) -> Result<Vec<SyncEvent>> {
		let g = self.lock()?;
		let mut batch: Vec<SyncEvent> = g
			.events
			.iter()
			.filter(|e| e.company_key == company_key && e.status == EventStatus::Pending)
			.cloned()
			.collect();
		// `None < Some(_)` matches NULLS FIRST
		batch.sort_by_key(|e| (e.log_seq, e.id));
		batch.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
		Ok(batch)
	}

	async fn transition(&self, event_id: i64, status: EventStatus) -> Result<()> {
		let mut g = self.lock()?;
		match g.events.iter_mut().find(|e| e.id == event_id) {
			Some(e) => {
				e.status = status;
				e.updated_at = Utc::now();
			}
			None => warn!("Sync event {} not found for transition to {}", event_id, status),
		}
		Ok(())
	}

	async fn record_failure(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
		error_detail: &str,
	) -> Result<()> {
		let mut g = self.lock()?;
		g.next_failure_id += 1;
		let id = g.next_failure_id;
		g.failures.push(SyncFailureLog {
			id,
			company_key: company_key.to_string(),
			log_seq,
			error_detail: error_detail.to_string(),
			created_at: Utc::now(),
		});
		Ok(())
	}

	async fn requeue(&self, event_id: i64) -> Result<bool> {
		let mut g = self.lock()?;
		match g
			.events
			.iter_mut()
			.find(|e| e.id == event_id && e.status == EventStatus::Failed)
		{
			Some(e) => {
				e.status = EventStatus::Pending;
				e.updated_at = Utc::now();
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn recent_failures(&self, company_key: &str, limit: i64) -> Result<Vec<SyncFailureLog>> {
		let g = self.lock()?;
		Ok(g
			.failures
			.iter()
			.rev()
			.filter(|f| f.company_key == company_key)
			.take(usize::try_from(limit.max(0)).unwrap_or(0))
			.cloned()
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn duplicate_trigger_is_ignored() {
		let ledger = MemoryLedger::new();
		let first = ledger.record_trigger("acme", Some(7)).await.unwrap();
		assert!(matches!(first, TriggerOutcome::Recorded(_)));
		assert_eq!(
			ledger.record_trigger("acme", Some(7)).await.unwrap(),
			TriggerOutcome::Duplicate
		);
		assert_eq!(
			ledger.record_trigger("acme", None).await.unwrap(),
			TriggerOutcome::Recorded(2)
		);
		assert_eq!(
			ledger.record_trigger("acme", None).await.unwrap(),
			TriggerOutcome::Duplicate
		);
		assert_eq!(ledger.events().len(), 2);
	}

	#[tokio::test]
	async fn requeue_only_moves_failed_events() {
		let ledger = MemoryLedger::new();
		let TriggerOutcome::Recorded(id) = ledger.record_trigger("acme", Some(1)).await.unwrap()
		else {
			panic!("expected a new entry");
		};
		assert!(!ledger.requeue(id).await.unwrap());

		ledger.transition(id, EventStatus::Failed).await.unwrap();
		assert!(ledger.requeue(id).await.unwrap());
		assert_eq!(ledger.events()[0].status, EventStatus::Pending);
	}
}
