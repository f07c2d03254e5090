use std::sync::Arc;
use std::time::Duration;

use vanopticon_mimir::ledger::{EventLedger, EventStatus, MemoryLedger, TriggerOutcome};

#[cfg(feature = "unit-tests")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_triggers_record_once() {
	let ledger = Arc::new(MemoryLedger::new());
	let mut handles = Vec::new();
	for _ in 0..32 {
		let ledger = ledger.clone();
		handles.push(tokio::spawn(async move {
			ledger.record_trigger("acme", Some(42)).await.unwrap()
		}));
	}

	let mut recorded = 0;
	for h in handles {
		if matches!(h.await.unwrap(), TriggerOutcome::Recorded(_)) {
			recorded += 1;
		}
	}
	assert_eq!(recorded, 1);
	assert_eq!(ledger.events().len(), 1);
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn pending_batch_is_ascending_and_capped() {
	let ledger = MemoryLedger::new();
	for seq in [9, 3, 7, 1] {
		ledger.record_trigger("acme", Some(seq)).await.unwrap();
	}
	ledger.record_trigger("acme", None).await.unwrap();
	ledger.record_trigger("globex", Some(2)).await.unwrap();

	let batch = ledger.fetch_pending_batch("acme", 100).await.unwrap();
	let seqs: Vec<Option<i64>> = batch.iter().map(|e| e.log_seq).collect();
	assert_eq!(seqs, vec![None, Some(1), Some(3), Some(7), Some(9)]);

	let capped = ledger.fetch_pending_batch("acme", 2).await.unwrap();
	assert_eq!(capped.len(), 2);
	assert_eq!(capped[1].log_seq, Some(1));
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn only_pending_events_are_fetched() {
	let ledger = MemoryLedger::new();
	let TriggerOutcome::Recorded(done) = ledger.record_trigger("acme", Some(1)).await.unwrap()
	else {
		panic!("expected a new entry");
	};
	ledger.record_trigger("acme", Some(2)).await.unwrap();
	ledger.transition(done, EventStatus::Completed).await.unwrap();

	let batch = ledger.fetch_pending_batch("acme", 100).await.unwrap();
	assert_eq!(batch.len(), 1);
	assert_eq!(batch[0].log_seq, Some(2));
	assert_eq!(batch[0].retry_count, 0);
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn oldest_waiting_company_goes_first() {
	let ledger = MemoryLedger::new();
	assert_eq!(ledger.find_oldest_waiting_company(&[]).await.unwrap(), None);

	let TriggerOutcome::Recorded(first) = ledger.record_trigger("globex", Some(1)).await.unwrap()
	else {
		panic!("expected a new entry");
	};
	ledger.record_trigger("acme", Some(1)).await.unwrap();
	assert_eq!(
		ledger.find_oldest_waiting_company(&[]).await.unwrap().as_deref(),
		Some("globex")
	);

	// a requeued event waits from the time it was requeued
	ledger.transition(first, EventStatus::Failed).await.unwrap();
	assert_eq!(
		ledger.find_oldest_waiting_company(&[]).await.unwrap().as_deref(),
		Some("acme")
	);
	tokio::time::sleep(Duration::from_millis(5)).await;
	assert!(ledger.requeue(first).await.unwrap());
	assert_eq!(
		ledger.find_oldest_waiting_company(&[]).await.unwrap().as_deref(),
		Some("acme")
	);

	let skip = ["acme".to_string()];
	assert_eq!(
		ledger.find_oldest_waiting_company(&skip).await.unwrap().as_deref(),
		Some("globex")
	);
	let skip = ["acme".to_string(), "globex".to_string()];
	assert_eq!(ledger.find_oldest_waiting_company(&skip).await.unwrap(), None);
}

#[cfg(feature = "unit-tests")]
#[tokio::test]
async fn failures_are_listed_newest_first() {
	let ledger = MemoryLedger::new();
	ledger.record_failure("acme", Some(1), "first").await.unwrap();
	ledger.record_failure("globex", None, "other").await.unwrap();
	ledger.record_failure("acme", Some(2), "second").await.unwrap();

	let recent = ledger.recent_failures("acme", 10).await.unwrap();
	let details: Vec<&str> = recent.iter().map(|f| f.error_detail.as_str()).collect();
	assert_eq!(details, vec!["second", "first"]);
	assert_eq!(ledger.recent_failures("acme", 1).await.unwrap().len(), 1);
}
