use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use super::{CompanyLock, LockLease};

/// Session-level Postgres advisory locks. The lease pins one pooled
/// connection for as long as the lock is held.
#[derive(Clone)]
pub struct PgAdvisoryLock {
	pool: PgPool,
}

impl PgAdvisoryLock {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

/// Stable 64-bit advisory key for a company.
pub fn advisory_key(company_key: &str) -> i64 {
	let digest = Sha256::digest(format!("org-sync:{company_key}").as_bytes());
	let mut buf = [0u8; 8];
	buf.copy_from_slice(&digest[..8]);
	i64::from_be_bytes(buf)
}

struct AdvisoryLease {
	conn: Option<PoolConnection<Postgres>>,
	key: i64,
}

impl Drop for AdvisoryLease {
	fn drop(&mut self) {
		// Not released cleanly: take the connection out of the pool so the
		// session ends and Postgres drops the lock with it.
		if let Some(conn) = self.conn.take() {
			warn!("Advisory lock {} dropped without release; closing its session", self.key);
			drop(conn.detach());
		}
	}
}

#[async_trait]
impl LockLease for AdvisoryLease {
	async fn release(self: Box<Self>) -> Result<()> {
		let mut lease = self;
		let Some(mut conn) = lease.conn.take() else {
			return Ok(());
		};
		let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
			.bind(lease.key)
			.fetch_one(&mut *conn)
			.await;
		let unlocked = match unlocked {
			Ok(v) => v,
			Err(e) => {
				// the session may still hold the lock; never return it to the pool
				drop(conn.detach());
				return Err(e).context("pg_advisory_unlock failed");
			}
		};
		if !unlocked {
			warn!("Advisory lock {} was not held at release", lease.key);
		}
		Ok(())
	}
}

#[async_trait]
impl CompanyLock for PgAdvisoryLock {
	async fn try_acquire(&self, company_key: &str) -> Result<Option<Box<dyn LockLease>>> {
		let key = advisory_key(company_key);
		let mut conn = self
			.pool
			.acquire()
			.await
			.context("failed to acquire connection for company lock")?;
		let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
			.bind(key)
			.fetch_one(&mut *conn)
			.await
			.context("pg_try_advisory_lock failed")?;

		if !acquired {
			debug!("Advisory lock {} for {} held elsewhere", key, company_key);
			return Ok(None);
		}
		debug!("Acquired advisory lock {} for {}", key, company_key);
		Ok(Some(Box::new(AdvisoryLease {
			conn: Some(conn),
			key,
		})))
	}
}
