//! Mapping from the external company key used by the ledger to the numeric
//! company id that scopes directory rows.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::PgPool;

#[async_trait]
pub trait CompanyResolver: Send + Sync + 'static {
	/// Unknown keys are an error; the event that needed them fails.
	async fn resolve(&self, company_key: &str) -> Result<i64>;
}

/// Reads the `company` table, which is owned by the tenant service.
#[derive(Clone)]
pub struct PgCompanyResolver {
	pool: PgPool,
}

impl PgCompanyResolver {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl CompanyResolver for PgCompanyResolver {
	async fn resolve(&self, company_key: &str) -> Result<i64> {
		sqlx::query_scalar::<_, i64>("SELECT id FROM company WHERE company_key = $1")
			.bind(company_key)
			.fetch_optional(&self.pool)
			.await
			.context("company lookup failed")?
			.ok_or_else(|| anyhow!("unknown company key: {company_key}"))
	}
}

/// Fixed key to id table.
#[derive(Debug, Clone, Default)]
pub struct StaticCompanyResolver {
	ids: HashMap<String, i64>,
}

impl StaticCompanyResolver {
	pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, i64)>) -> Self {
		Self {
			ids: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
		}
	}
}

#[async_trait]
impl CompanyResolver for StaticCompanyResolver {
	async fn resolve(&self, company_key: &str) -> Result<i64> {
		self.ids
			.get(company_key)
			.copied()
			.ok_or_else(|| anyhow!("unknown company key: {company_key}"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn static_resolver_rejects_unknown_keys() {
		let resolver = StaticCompanyResolver::new([("acme", 7)]);
		assert_eq!(resolver.resolve("acme").await.unwrap(), 7);
		let err = resolver.resolve("globex").await.unwrap_err();
		assert!(err.to_string().contains("globex"));
	}
}
