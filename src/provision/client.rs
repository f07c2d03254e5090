use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::{ProvisioningClient, ProvisioningError, SequenceSignal, SnapshotPayload};

/// `reqwest` client for the provisioning service's org-sync API.
#[derive(Clone)]
pub struct HttpProvisioningClient {
	client: Client,
	base_url: Url,
	token: Option<String>,
}

impl HttpProvisioningClient {
	pub fn new(
		base_url: Url,
		token: Option<String>,
		timeout: Duration,
	) -> Result<Self, ProvisioningError> {
		let client = Client::builder()
			.timeout(timeout)
			.user_agent(concat!("mimir/", env!("CARGO_PKG_VERSION")))
			.build()?;
		Ok(Self {
			client,
			base_url,
			token,
		})
	}

	/// `{base}/api/v1/org-sync/companies/{company_key}/{tail..}` with every
	/// segment percent-encoded.
	pub fn endpoint(&self, company_key: &str, tail: &[&str]) -> Result<Url, ProvisioningError> {
		let mut url = self.base_url.clone();
		{
			let mut segments = url
				.path_segments_mut()
				.map_err(|_| ProvisioningError::BaseUrl(self.base_url.clone()))?;
			segments
				.pop_if_empty()
				.extend(["api", "v1", "org-sync", "companies", company_key])
				.extend(tail);
		}
		Ok(url)
	}

	/// GET `url`; `Ok(None)` on 204.
	async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, ProvisioningError> {
		debug!("GET {}", url);
		let mut req = self.client.get(url.clone());
		if let Some(token) = &self.token {
			req = req.bearer_auth(token);
		}
		let response = req.send().await?;

		let status = response.status();
		if status == StatusCode::NO_CONTENT {
			return Ok(None);
		}
		if !status.is_success() {
			return Err(ProvisioningError::Status {
				status,
				url: url.to_string(),
			});
		}

		let body = response.bytes().await?;
		Ok(Some(serde_json::from_slice(&body)?))
	}
}

#[async_trait]
impl ProvisioningClient for HttpProvisioningClient {
	async fn incremental_changes(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
	) -> Result<Option<SequenceSignal>> {
		let mut url = self.endpoint(company_key, &["sequence"])?;
		if let Some(seq) = log_seq {
			url.query_pairs_mut().append_pair("logSeq", &seq.to_string());
		}
		Ok(self.get_json(url).await?)
	}

	async fn snapshot_payload(&self, company_key: &str, snapshot_id: i64) -> Result<SnapshotPayload> {
		let id = snapshot_id.to_string();
		let url = self.endpoint(company_key, &["snapshots", id.as_str()])?;
		self.get_json(url.clone()).await?.ok_or_else(|| {
			anyhow::anyhow!("provisioning service returned no content for snapshot {snapshot_id} ({url})")
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn client(base: &str) -> HttpProvisioningClient {
		HttpProvisioningClient::new(Url::parse(base).unwrap(), None, Duration::from_secs(1)).unwrap()
	}

	#[test]
	fn endpoint_appends_encoded_segments() {
		let c = client("https://prov.example.com/base/");
		let url = c.endpoint("acme corp", &["snapshots", "12"]).unwrap();
		assert_eq!(
			url.as_str(),
			"https://prov.example.com/base/api/v1/org-sync/companies/acme%20corp/snapshots/12"
		);
	}

	#[test]
	fn endpoint_rejects_opaque_base() {
		let c = client("mailto:ops@example.com");
		assert!(matches!(
			c.endpoint("acme", &["sequence"]),
			Err(ProvisioningError::BaseUrl(_))
		));
	}
}
