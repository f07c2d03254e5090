//! Inbound trigger intake.
//!
//! Triggers arrive as small JSON documents naming a company and, usually, the
//! log position the change was published at. Intake never fails the caller:
//! bad payloads are discarded with a warning and ledger errors are logged.

use std::sync::Arc;

use log::{debug, error, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::ledger::{EventLedger, TriggerOutcome};
use crate::observability::MetricsRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TriggerPayload {
	#[serde(rename = "companyKey", alias = "companyUuid", default)]
	pub company_key: Option<String>,
	#[serde(rename = "logSeq", default)]
	pub log_seq: Option<i64>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
	#[error("malformed trigger payload: {0}")]
	Malformed(#[from] serde_json::Error),
	#[error("trigger payload has no company key")]
	MissingCompanyKey,
}

/// A validated trigger: the company key is present and trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
	pub company_key: String,
	pub log_seq: Option<i64>,
}

impl TriggerPayload {
	pub fn parse(raw: &[u8]) -> Result<Trigger, TriggerError> {
		let payload: TriggerPayload = serde_json::from_slice(raw)?;
		payload.validate()
	}

	fn validate(self) -> Result<Trigger, TriggerError> {
		let key = self
			.company_key
			.as_deref()
			.map(str::trim)
			.filter(|k| !k.is_empty())
			.ok_or(TriggerError::MissingCompanyKey)?;
		Ok(Trigger {
			company_key: key.to_string(),
			log_seq: self.log_seq,
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
	Recorded,
	Duplicate,
	Discarded,
}

/// Per-outcome tallies from a stream of payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeCounts {
	pub recorded: usize,
	pub duplicate: usize,
	pub discarded: usize,
}

impl IntakeCounts {
	fn add(&mut self, outcome: IntakeOutcome) {
		match outcome {
			IntakeOutcome::Recorded => self.recorded += 1,
			IntakeOutcome::Duplicate => self.duplicate += 1,
			IntakeOutcome::Discarded => self.discarded += 1,
		}
	}
}

#[derive(Clone)]
pub struct TriggerIntake {
	ledger: Arc<dyn EventLedger>,
	metrics: Arc<MetricsRegistry>,
}

impl TriggerIntake {
	pub fn new(ledger: Arc<dyn EventLedger>, metrics: Arc<MetricsRegistry>) -> Self {
		Self { ledger, metrics }
	}

	/// Record one raw trigger in the ledger.
	pub async fn accept(&self, raw: &[u8]) -> IntakeOutcome {
		let trigger = match TriggerPayload::parse(raw) {
			Ok(t) => t,
			Err(e) => {
				self.metrics.triggers_discarded_total.inc();
				warn!("Discarding trigger: {}", e);
				return IntakeOutcome::Discarded;
			}
		};

		match self
			.ledger
			.record_trigger(&trigger.company_key, trigger.log_seq)
			.await
		{
			Ok(TriggerOutcome::Recorded(id)) => {
				self.metrics.triggers_recorded_total.inc();
				debug!(
					"Recorded trigger {} for {} at {:?}",
					id, trigger.company_key, trigger.log_seq
				);
				IntakeOutcome::Recorded
			}
			Ok(TriggerOutcome::Duplicate) => {
				self.metrics.triggers_duplicate_total.inc();
				IntakeOutcome::Duplicate
			}
			Err(e) => {
				self.metrics.triggers_discarded_total.inc();
				error!(
					"Failed to record trigger for {} at {:?}: {:?}",
					trigger.company_key, trigger.log_seq, e
				);
				IntakeOutcome::Discarded
			}
		}
	}

	/// Feed newline-delimited payloads, one trigger per line. Blank lines are
	/// skipped. Only a read error on the stream itself is returned.
	pub async fn accept_ndjson<R>(&self, reader: R) -> std::io::Result<IntakeCounts>
	where
		R: AsyncBufRead + Unpin,
	{
		let mut counts = IntakeCounts::default();
		let mut lines = reader.lines();
		while let Some(line) = lines.next_line().await? {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			counts.add(self.accept(line.as_bytes()).await);
		}
		Ok(counts)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::ledger::MemoryLedger;

	fn intake() -> (Arc<MemoryLedger>, TriggerIntake) {
		let ledger = Arc::new(MemoryLedger::new());
		let metrics = Arc::new(MetricsRegistry::try_new().expect("metrics"));
		(ledger.clone(), TriggerIntake::new(ledger, metrics))
	}

	#[test]
	fn parse_accepts_legacy_key_and_missing_seq() {
		let t = TriggerPayload::parse(br#"{"companyUuid":" acme "}"#).expect("parse");
		assert_eq!(t.company_key, "acme");
		assert_eq!(t.log_seq, None);
	}

	#[test]
	fn parse_rejects_blank_key() {
		let err = TriggerPayload::parse(br#"{"companyKey":"  ","logSeq":3}"#).unwrap_err();
		assert!(matches!(err, TriggerError::MissingCompanyKey));
		let err = TriggerPayload::parse(b"not json").unwrap_err();
		assert!(matches!(err, TriggerError::Malformed(_)));
	}

	#[tokio::test]
	async fn duplicate_trigger_is_reported_not_recorded() {
		let (ledger, intake) = intake();
		let raw = br#"{"companyKey":"acme","logSeq":7}"#;
		assert_eq!(intake.accept(raw).await, IntakeOutcome::Recorded);
		assert_eq!(intake.accept(raw).await, IntakeOutcome::Duplicate);
		assert_eq!(ledger.events().len(), 1);
	}

	#[tokio::test]
	async fn ndjson_file_is_counted_per_outcome() {
		use std::io::Write;

		let mut file = tempfile::NamedTempFile::new().expect("tempfile");
		writeln!(file, r#"{{"companyKey":"acme","logSeq":1}}"#).expect("write");
		writeln!(file).expect("write");
		writeln!(file, r#"{{"companyKey":"acme","logSeq":2}}"#).expect("write");
		writeln!(file, r#"{{"companyKey":"acme","logSeq":1}}"#).expect("write");
		writeln!(file, "{{broken").expect("write");
		file.flush().expect("flush");

		let (ledger, intake) = intake();
		let f = tokio::fs::File::open(file.path()).await.expect("open");
		let counts = intake
			.accept_ndjson(tokio::io::BufReader::new(f))
			.await
			.expect("read");

		assert_eq!(
			counts,
			IntakeCounts {
				recorded: 2,
				duplicate: 1,
				discarded: 1
			}
		);
		assert_eq!(ledger.events().len(), 2);
	}
}
