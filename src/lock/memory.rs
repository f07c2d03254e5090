use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::{CompanyLock, LockLease};

/// Lock table local to this process. Only correct when a single engine
/// instance runs against the database.
#[derive(Default, Clone)]
pub struct MemoryCompanyLock {
	held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryCompanyLock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_held(&self, company_key: &str) -> bool {
		self.held
			.lock()
			.map(|h| h.contains(company_key))
			.unwrap_or(false)
	}
}

struct MemoryLease {
	held: Arc<Mutex<HashSet<String>>>,
	key: String,
}

impl Drop for MemoryLease {
	fn drop(&mut self) {
		if let Ok(mut held) = self.held.lock() {
			held.remove(&self.key);
		}
	}
}

#[async_trait]
impl LockLease for MemoryLease {
	async fn release(self: Box<Self>) -> Result<()> {
		drop(self);
		Ok(())
	}
}

#[async_trait]
impl CompanyLock for MemoryCompanyLock {
	async fn try_acquire(&self, company_key: &str) -> Result<Option<Box<dyn LockLease>>> {
		let mut held = self
			.held
			.lock()
			.map_err(|_| anyhow!("company lock table poisoned"))?;
		if !held.insert(company_key.to_string()) {
			return Ok(None);
		}
		Ok(Some(Box::new(MemoryLease {
			held: self.held.clone(),
			key: company_key.to_string(),
		})))
	}
}
