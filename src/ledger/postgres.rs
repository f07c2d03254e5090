use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use sqlx::PgPool;

use super::{EventLedger, EventStatus, SyncEvent, SyncFailureLog, TriggerOutcome};

/// Ledger backed by the `org_sync_event` and `org_sync_failure_log` tables.
#[derive(Clone)]
pub struct PgLedger {
	pool: PgPool,
}

impl PgLedger {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[derive(sqlx::FromRow)]
struct EventRow {
	id: i64,
	company_key: String,
	log_seq: Option<i64>,
	status: String,
	retry_count: i32,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for SyncEvent {
	type Error = anyhow::Error;

	fn try_from(row: EventRow) -> Result<Self> {
		Ok(Self {
			id: row.id,
			company_key: row.company_key,
			log_seq: row.log_seq,
			status: row.status.parse()?,
			retry_count: row.retry_count,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct FailureRow {
	id: i64,
	company_key: String,
	log_seq: Option<i64>,
	error_detail: String,
	created_at: DateTime<Utc>,
}

#[async_trait]
impl EventLedger for PgLedger {
	async fn record_trigger(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
	) -> Result<TriggerOutcome> {
		let res = sqlx::query_scalar::<_, i64>(
			"INSERT INTO org_sync_event (company_key, log_seq, status, retry_count) \
			 VALUES ($1, $2, 'PENDING', 0) RETURNING id",
		)
		.bind(company_key)
		.bind(log_seq)
		.fetch_one(&self.pool)
		.await;

		match res {
			Ok(id) => Ok(TriggerOutcome::Recorded(id)),
			Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
				warn!(
					"Duplicate sync trigger ignored: company={} log_seq={:?}",
					company_key, log_seq
				);
				Ok(TriggerOutcome::Duplicate)
			}
			Err(e) => Err(e).context("failed to insert sync event"),
		}
	}

	async fn find_oldest_waiting_company(&self, skip: &[String]) -> Result<Option<String>> {
		let key = sqlx::query_scalar::<_, String>(
			"SELECT company_key FROM org_sync_event \
			 WHERE status = 'PENDING' AND NOT (company_key = ANY($1)) \
			 GROUP BY company_key ORDER BY MIN(updated_at) ASC, MIN(id) ASC LIMIT 1",
		)
		.bind(skip)
		.fetch_optional(&self.pool)
		.await
		.context("failed to query pending companies")?;
		Ok(key)
	}

	async fn fetch_pending_batch(&self, company_key: &str, limit: i64) -> Result<Vec<SyncEvent>> {
		let rows = sqlx::query_as::<_, EventRow>(
			"SELECT id, company_key, log_seq, status, retry_count, created_at, updated_at \
			 FROM org_sync_event WHERE company_key = $1 AND status = 'PENDING' \
			 ORDER BY log_seq ASC NULLS FIRST, id ASC LIMIT $2",
		)
		.bind(company_key)
		.bind(limit)
		.fetch_all(&self.pool)
		.await
		.context("failed to fetch pending events")?;

		rows.into_iter().map(SyncEvent::try_from).collect()
	}

	async fn transition(&self, event_id: i64, status: EventStatus) -> Result<()> {
		let res = sqlx::query(
			"UPDATE org_sync_event SET status = $2, updated_at = now() WHERE id = $1",
		)
		.bind(event_id)
		.bind(status.as_str())
		.execute(&self.pool)
		.await
		.with_context(|| format!("failed to move event {event_id} to {status}"))?;

		if res.rows_affected() == 0 {
			warn!("Sync event {} not found for transition to {}", event_id, status);
		} else {
			debug!("Sync event {} -> {}", event_id, status);
		}
		Ok(())
	}

	async fn record_failure(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
		error_detail: &str,
	) -> Result<()> {
		sqlx::query(
			"INSERT INTO org_sync_failure_log (company_key, log_seq, error_detail) VALUES ($1, $2, $3)",
		)
		.bind(company_key)
		.bind(log_seq)
		.bind(error_detail)
		.execute(&self.pool)
		.await
		.context("failed to write sync failure log")?;
		Ok(())
	}

	async fn requeue(&self, event_id: i64) -> Result<bool> {
		let res = sqlx::query(
			"UPDATE org_sync_event SET status = 'PENDING', updated_at = now() \
			 WHERE id = $1 AND status = 'FAILED'",
		)
		.bind(event_id)
		.execute(&self.pool)
		.await
		.context("failed to requeue sync event")?;
		Ok(res.rows_affected() == 1)
	}

	async fn recent_failures(&self, company_key: &str, limit: i64) -> Result<Vec<SyncFailureLog>> {
		let rows = sqlx::query_as::<_, FailureRow>(
			"SELECT id, company_key, log_seq, error_detail, created_at FROM org_sync_failure_log \
			 WHERE company_key = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
		)
		.bind(company_key)
		.bind(limit)
		.fetch_all(&self.pool)
		.await
		.context("failed to read sync failure log")?;

		Ok(rows
			.into_iter()
			.map(|r| SyncFailureLog {
				id: r.id,
				company_key: r.company_key,
				log_seq: r.log_seq,
				error_detail: r.error_detail,
				created_at: r.created_at,
			})
			.collect())
	}
}
