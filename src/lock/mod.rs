//! Per-company mutual exclusion.
//!
//! At most one task per company key runs at a time across every engine
//! instance sharing the backend. Contention is deferral, not failure: the
//! work stays pending in the ledger and is picked up on a later poll.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};

pub use memory::MemoryCompanyLock;
pub use postgres::PgAdvisoryLock;

/// A held lock. Dropping a lease without calling `release` must still free
/// the lock, so cancelled tasks never leak it.
#[async_trait]
pub trait LockLease: Send {
	async fn release(self: Box<Self>) -> Result<()>;
}

/// Non-blocking acquisition of a company lock.
#[async_trait]
pub trait CompanyLock: Send + Sync + 'static {
	/// `Ok(None)` when another holder has the key.
	async fn try_acquire(&self, company_key: &str) -> Result<Option<Box<dyn LockLease>>>;
}

#[derive(Clone)]
pub struct CompanyLockManager {
	lock: Arc<dyn CompanyLock>,
}

impl CompanyLockManager {
	pub fn new(lock: Arc<dyn CompanyLock>) -> Self {
		Self { lock }
	}

	/// Run `task` while holding the lock for `company_key`. Returns `false`
	/// without polling `task` when the lock is held elsewhere.
	pub async fn run_exclusive<F>(&self, company_key: &str, task: F) -> Result<bool>
	where
		F: Future<Output = ()> + Send,
	{
		let Some(lease) = self.lock.try_acquire(company_key).await? else {
			debug!("Company lock busy, deferring: {}", company_key);
			return Ok(false);
		};

		task.await;

		if let Err(e) = lease.release().await {
			warn!("Failed to release company lock for {}: {:?}", company_key, e);
		}
		Ok(true)
	}
}
