//! Poll loop and per-event processing.
//!
//! Every tick asks the ledger which company has waited longest and hands
//! that company to a bounded worker pool. The only local state is the set of
//! companies this process already has a worker on, which the ledger query
//! skips. Restarting the process loses nothing that is still `PENDING`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::ledger::{EventLedger, EventStatus, SyncEvent};
use crate::lock::CompanyLockManager;
use crate::observability::MetricsRegistry;
use crate::sync::{OrgSyncOrchestrator, SyncOutcome};

/// Runs ledger events through the sync orchestrator and records the result.
pub struct EventProcessor {
	ledger: Arc<dyn EventLedger>,
	orchestrator: OrgSyncOrchestrator,
	metrics: Arc<MetricsRegistry>,
}

/// Terminal states reached by one company batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
	pub completed: usize,
	pub failed: usize,
}

impl EventProcessor {
	pub fn new(
		ledger: Arc<dyn EventLedger>,
		orchestrator: OrgSyncOrchestrator,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			ledger,
			orchestrator,
			metrics,
		}
	}

	/// Process up to `batch_size` pending events for one company in log
	/// order. Must be called while holding the company lock. A failed event
	/// does not stop the rest of the batch.
	#[tracing::instrument(skip(self))]
	pub async fn process_company(&self, company_key: &str, batch_size: i64) -> Result<BatchReport> {
		let events = self.ledger.fetch_pending_batch(company_key, batch_size).await?;
		info!("Processing {} pending events for {}", events.len(), company_key);

		let mut report = BatchReport::default();
		for event in &events {
			match self.handle_event(event).await {
				EventStatus::Completed => report.completed += 1,
				_ => report.failed += 1,
			}
		}

		info!(
			"Finished batch for {}: completed={} failed={}",
			company_key, report.completed, report.failed
		);
		Ok(report)
	}

	/// `PROCESSING`, sync, then `COMPLETED`; any error on the way ends in
	/// `FAILED` plus one failure log entry. Never returns an error.
	#[tracing::instrument(
		skip(self, event),
		fields(event_id = event.id, company = %event.company_key, log_seq = ?event.log_seq)
	)]
	pub async fn handle_event(&self, event: &SyncEvent) -> EventStatus {
		let started = Instant::now();
		let res = self.run_event(event).await;
		self.metrics
			.event_duration_seconds
			.observe(started.elapsed().as_secs_f64());

		match res {
			Ok(outcome) => {
				self.metrics.events_completed_total.inc();
				info!(
					"Sync event {} completed: company={} log_seq={:?} final_log_seq={:?}",
					event.id, event.company_key, event.log_seq, outcome.final_log_seq
				);
				EventStatus::Completed
			}
			Err(e) => {
				self.metrics.events_failed_total.inc();
				error!(
					"Sync event {} failed: company={} log_seq={:?}: {:#}",
					event.id, event.company_key, event.log_seq, e
				);
				if let Err(te) = self.ledger.transition(event.id, EventStatus::Failed).await {
					error!("Could not mark sync event {} failed: {:?}", event.id, te);
				}
				let detail = format!("{e:?}");
				if let Err(fe) = self
					.ledger
					.record_failure(&event.company_key, event.log_seq, &detail)
					.await
				{
					error!("Could not write failure log for event {}: {:?}", event.id, fe);
				}
				EventStatus::Failed
			}
		}
	}

	async fn run_event(&self, event: &SyncEvent) -> Result<SyncOutcome> {
		self.ledger
			.transition(event.id, EventStatus::Processing)
			.await?;
		let outcome = self
			.orchestrator
			.sync_company(&event.company_key, event.log_seq)
			.await?;
		self.ledger
			.transition(event.id, EventStatus::Completed)
			.await?;
		Ok(outcome)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
	pub poll_interval: Duration,
	pub batch_size: i64,
	pub max_workers: usize,
}

impl From<&Settings> for SchedulerConfig {
	fn from(s: &Settings) -> Self {
		Self {
			poll_interval: s.poll_interval(),
			batch_size: s.batch_size,
			max_workers: s.max_workers,
		}
	}
}

/// What one poll did.
#[derive(Debug)]
pub enum Tick {
	/// No company without a local worker has pending work.
	Idle,
	/// Every worker is busy; the work stays pending.
	Busy,
	/// A worker was started for the company. The handle resolves to `true`
	/// when the company lock was acquired and the batch ran.
	Dispatched {
		company_key: String,
		handle: JoinHandle<bool>,
	},
}

type CompanySet = Arc<Mutex<HashSet<String>>>;

fn companies(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
	set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a company as having a local worker until dropped.
struct InFlight {
	set: CompanySet,
	company_key: String,
}

impl InFlight {
	fn enter(set: &CompanySet, company_key: &str) -> Self {
		companies(set).insert(company_key.to_string());
		Self {
			set: set.clone(),
			company_key: company_key.to_string(),
		}
	}
}

impl Drop for InFlight {
	fn drop(&mut self) {
		companies(&self.set).remove(&self.company_key);
	}
}

pub struct Scheduler {
	ledger: Arc<dyn EventLedger>,
	locks: CompanyLockManager,
	processor: Arc<EventProcessor>,
	metrics: Arc<MetricsRegistry>,
	config: SchedulerConfig,
	workers: Arc<Semaphore>,
	in_flight: CompanySet,
}

impl Scheduler {
	pub fn new(
		ledger: Arc<dyn EventLedger>,
		locks: CompanyLockManager,
		processor: Arc<EventProcessor>,
		metrics: Arc<MetricsRegistry>,
		config: SchedulerConfig,
	) -> Self {
		let workers = Arc::new(Semaphore::new(config.max_workers.max(1)));
		Self {
			ledger,
			locks,
			processor,
			metrics,
			config,
			workers,
			in_flight: CompanySet::default(),
		}
	}

	/// One poll: pick the longest-waiting company that has no local worker yet
	/// and dispatch it to a worker. Never waits for the worker.
	pub async fn tick(&self) -> Result<Tick> {
		self.metrics.scheduler_ticks_total.inc();

		let Ok(permit) = self.workers.clone().try_acquire_owned() else {
			self.metrics.scheduler_busy_skips_total.inc();
			debug!("All sync workers busy, skipping tick");
			return Ok(Tick::Busy);
		};

		let busy: Vec<String> = companies(&self.in_flight).iter().cloned().collect();
		let Some(company_key) = self.ledger.find_oldest_waiting_company(&busy).await? else {
			return Ok(Tick::Idle);
		};
		let marker = InFlight::enter(&self.in_flight, &company_key);

		let locks = self.locks.clone();
		let processor = self.processor.clone();
		let metrics = self.metrics.clone();
		let batch_size = self.config.batch_size;
		let key = company_key.clone();

		let handle = tokio::spawn(async move {
			let _permit = permit;
			let _marker = marker;
			metrics.workers_in_flight.inc();
			let res = locks
				.run_exclusive(&key, async {
					if let Err(e) = processor.process_company(&key, batch_size).await {
						error!("Batch for {} aborted: {:?}", key, e);
					}
				})
				.await;
			metrics.workers_in_flight.dec();

			match res {
				Ok(true) => true,
				Ok(false) => {
					metrics.lock_contention_total.inc();
					warn!("Company {} is being processed elsewhere, deferring", key);
					false
				}
				Err(e) => {
					error!("Could not lock company {}: {:?}", key, e);
					false
				}
			}
		});

		Ok(Tick::Dispatched {
			company_key,
			handle,
		})
	}

	/// Poll with a fixed delay until `shutdown` flips to true, then wait for
	/// every in-flight worker to finish.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
		info!(
			"Scheduler started: poll_interval={:?} batch_size={} max_workers={}",
			self.config.poll_interval, self.config.batch_size, self.config.max_workers
		);

		while !*shutdown.borrow() {
			match self.tick().await {
				Ok(Tick::Dispatched { company_key, .. }) => {
					debug!("Dispatched sync worker for {}", company_key)
				}
				Ok(_) => {}
				Err(e) => error!("Scheduler tick failed: {:?}", e),
			}

			tokio::select! {
				_ = tokio::time::sleep(self.config.poll_interval) => {}
				changed = shutdown.changed() => {
					if changed.is_err() {
						break;
					}
				}
			}
		}

		info!("Scheduler stopping, waiting for in-flight workers");
		let permits = u32::try_from(self.config.max_workers.max(1)).unwrap_or(u32::MAX);
		let _ = self.workers.acquire_many(permits).await;
		info!("Scheduler stopped");
	}
}
