use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde::Serialize;
use url::Url;

/// Downstream cache layer that must drop everything it holds for a company
/// after a snapshot rewrote that company's directory.
#[async_trait]
pub trait CacheInvalidator: Send + Sync + 'static {
	async fn invalidate_all(&self, company_key: &str) -> Result<()>;
}

/// Records the signal in the log only. Used when no cache endpoint is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct LogCacheInvalidator;

#[async_trait]
impl CacheInvalidator for LogCacheInvalidator {
	async fn invalidate_all(&self, company_key: &str) -> Result<()> {
		info!("Full cache invalidation required for company {}", company_key);
		Ok(())
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidationRequest<'a> {
	company_key: &'a str,
	scope: &'static str,
}

/// POSTs `{"companyKey": .., "scope": "ALL"}` to the configured endpoint.
#[derive(Clone)]
pub struct HttpCacheInvalidator {
	client: Client,
	url: Url,
}

impl HttpCacheInvalidator {
	pub fn new(url: Url, timeout: Duration) -> Result<Self> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.context("failed to build cache invalidation client")?;
		Ok(Self { client, url })
	}
}

#[async_trait]
impl CacheInvalidator for HttpCacheInvalidator {
	async fn invalidate_all(&self, company_key: &str) -> Result<()> {
		self.client
			.post(self.url.clone())
			.json(&InvalidationRequest {
				company_key,
				scope: "ALL",
			})
			.send()
			.await
			.context("cache invalidation request failed")?
			.error_for_status()
			.context("cache invalidation rejected")?;
		info!("Cache invalidated for company {}", company_key);
		Ok(())
	}
}
