//! Boundary to the authoritative provisioning service.

pub mod client;
pub mod error;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::directory::{Department, Member, OrganizationCode, User};

pub use client::HttpProvisioningClient;
pub use error::ProvisioningError;

/// Answer to "what changed since `logSeq`?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceSignal {
	#[serde(rename = "logSeq", default)]
	pub next_log_seq: Option<i64>,
	#[serde(default)]
	pub need_snapshot: bool,
	#[serde(rename = "snapshotIdList", alias = "snapshotTargets", default)]
	pub snapshot_targets: Vec<i64>,
	#[serde(rename = "needUpdateNextLog", alias = "continueAdvancing", default)]
	pub continue_advancing: bool,
}

impl SequenceSignal {
	/// A snapshot branch is only taken when there is something to fetch.
	pub fn wants_snapshot(&self) -> bool {
		self.need_snapshot && !self.snapshot_targets.is_empty()
	}
}

/// Full-state export of a company's directory at one log position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
	#[serde(default)]
	pub snapshot_id: Option<i64>,
	#[serde(default)]
	pub log_seq: Option<i64>,
	#[serde(alias = "organizationCodes", default)]
	pub org_codes: Vec<OrganizationCode>,
	#[serde(default)]
	pub departments: Vec<Department>,
	#[serde(default)]
	pub users: Vec<User>,
	#[serde(default)]
	pub members: Vec<Member>,
}

#[async_trait]
pub trait ProvisioningClient: Send + Sync + 'static {
	/// Incremental changes since `log_seq`. `None` means the remote has
	/// nothing further to report.
	async fn incremental_changes(
		&self,
		company_key: &str,
		log_seq: Option<i64>,
	) -> Result<Option<SequenceSignal>>;

	async fn snapshot_payload(&self, company_key: &str, snapshot_id: i64) -> Result<SnapshotPayload>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_signal_accepts_remote_field_names() {
		let json = r#"{"logSeq": 42, "needSnapshot": true, "snapshotIdList": [7, 8], "needUpdateNextLog": false}"#;
		let signal: SequenceSignal = serde_json::from_str(json).unwrap();
		assert_eq!(signal.next_log_seq, Some(42));
		assert_eq!(signal.snapshot_targets, vec![7, 8]);
		assert!(signal.wants_snapshot());
		assert!(!signal.continue_advancing);

		let empty: SequenceSignal = serde_json::from_str(r#"{"needSnapshot": true}"#).unwrap();
		assert!(!empty.wants_snapshot());
	}

	#[test]
	fn snapshot_payload_defaults_missing_collections() {
		let json = r#"{"snapshotId": 3, "logSeq": 90, "organizationCodes": [{"id": 1, "type": "duty"}]}"#;
		let payload: SnapshotPayload = serde_json::from_str(json).unwrap();
		assert_eq!(payload.org_codes.len(), 1);
		assert!(payload.departments.is_empty());
		assert!(payload.members.is_empty());
		assert_eq!(payload.log_seq, Some(90));
	}
}
