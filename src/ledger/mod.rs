//! Event ledger: the durable record of sync triggers per company.
//!
//! The ledger is the only scheduling state. Whatever is `PENDING` here is the
//! work the dispatcher will pick up, which keeps restarts safe.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Lifecycle of a ledger entry. Intended lattice:
/// `Pending -> Processing -> {Completed, Failed}`; `Failed -> Pending` only
/// through an operator replay. Transitions are not validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

impl EventStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::Processing => "PROCESSING",
			Self::Completed => "COMPLETED",
			Self::Failed => "FAILED",
		}
	}
}

impl std::fmt::Display for EventStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for EventStatus {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"PENDING" => Ok(Self::Pending),
			"PROCESSING" => Ok(Self::Processing),
			"COMPLETED" => Ok(Self::Completed),
			"FAILED" => Ok(Self::Failed),
			other => anyhow::bail!("unknown event status: {other}"),
		}
	}
}

/// A sync-needed signal for one company at one log position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEvent {
	pub id: i64,
	pub company_key: String,
	pub log_seq: Option<i64>,
	pub status: EventStatus,
	/// Carried for operators; the engine never advances it.
	pub retry_count: i32,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Append-only record of an event that failed processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailureLog {
	pub id: i64,
	pub company_key: String,
	pub log_seq: Option<i64>,
	pub error_detail: String,
	pub created_at: DateTime<Utc>,
}

/// Result of recording an inbound trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
	/// A new `PENDING` entry with this id.
	Recorded(i64),
	/// The `(company_key, log_seq)` pair was already in the ledger.
	Duplicate,
}

/// Storage seam for the ledger and its failure log. Every operation is
/// individually atomic; none of them is protected by the company lock.
#[async_trait]
pub trait EventLedger: Send + Sync + 'static {
	/// Insert a `PENDING` entry. Deduplication relies solely on the unique
	/// `(company_key, log_seq)` constraint; a violation yields `Duplicate`.
	async fn record_trigger(&self, company_key: &str, log_seq: Option<i64>)
	-> Result<TriggerOutcome>;

	/// The company whose pending work has waited longest, by the oldest
	/// `updated_at` among its `PENDING` entries. Companies in `skip` are
	/// passed over.
	async fn find_oldest_waiting_company(&self, skip: &[String]) -> Result<Option<String>>;

	/// Up to `limit` `PENDING` entries for one company in ascending
	/// `log_seq` order (a missing `log_seq` sorts first).
	async fn fetch_pending_batch(&self, company_key: &str, limit: i64) -> Result<Vec<SyncEvent>>;

	async fn transition(&self, event_id: i64, status: EventStatus) -> Result<()>;

	async fn record_failure(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
		error_detail: &str,
	) -> Result<()>;

	/// Operator replay: move a `FAILED` entry back to `PENDING`. Returns
	/// false when the entry is missing or not failed.
	async fn requeue(&self, event_id: i64) -> Result<bool>;

	/// Newest-first failure log entries for one company.
	async fn recent_failures(&self, company_key: &str, limit: i64) -> Result<Vec<SyncFailureLog>>;
}
