use thiserror::Error;
use url::Url;

/// Errors talking to the provisioning service. None of them are retried
/// locally; they surface as a failed ledger event.
#[derive(Debug, Error)]
pub enum ProvisioningError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("provisioning service returned {status} for {url}")]
	Status {
		status: reqwest::StatusCode,
		url: String,
	},

	#[error("failed to decode provisioning response: {0}")]
	Decode(#[from] serde_json::Error),

	#[error("provisioning base url cannot carry a path: {0}")]
	BaseUrl(Url),
}
