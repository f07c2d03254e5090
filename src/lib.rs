pub mod bulk;
pub mod company;
pub mod config;
pub mod db;
pub mod directory;
pub mod ingest;
pub mod ledger;
pub mod lock;
pub mod observability;
pub mod provision;
pub mod scheduler;
pub mod store;
pub mod sync;

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use sqlx::PgPool;
use tokio::sync::watch;

use crate::company::{CompanyResolver, PgCompanyResolver};
use crate::config::{LockBackend, Settings};
use crate::ingest::TriggerIntake;
use crate::ledger::{EventLedger, PgLedger};
use crate::lock::{CompanyLock, CompanyLockManager, MemoryCompanyLock, PgAdvisoryLock};
use crate::observability::MetricsRegistry;
use crate::provision::{HttpProvisioningClient, ProvisioningClient};
use crate::scheduler::{EventProcessor, Scheduler, SchedulerConfig};
use crate::store::{DirectoryStore, PgDirectory};
use crate::sync::{
	CacheInvalidator, HttpCacheInvalidator, LogCacheInvalidator, OrgSyncOrchestrator,
	SequenceSyncer, SnapshotSyncer,
};

/// The seams an engine is assembled from.
pub struct Components {
	pub ledger: Arc<dyn EventLedger>,
	pub resolver: Arc<dyn CompanyResolver>,
	pub store: Arc<dyn DirectoryStore>,
	pub lock: Arc<dyn CompanyLock>,
	pub client: Arc<dyn ProvisioningClient>,
	pub cache: Arc<dyn CacheInvalidator>,
}

impl Components {
	/// Postgres-backed components plus the HTTP provisioning client.
	pub fn from_settings(settings: &Settings, pool: PgPool) -> Result<Self> {
		let lock: Arc<dyn CompanyLock> = match settings.lock_backend {
			LockBackend::Postgres => Arc::new(PgAdvisoryLock::new(pool.clone())),
			LockBackend::Memory => {
				warn!("Using in-process company locks; run a single engine instance only");
				Arc::new(MemoryCompanyLock::new())
			}
		};

		let client = HttpProvisioningClient::new(
			settings.provisioning_base_url.clone(),
			settings.provisioning_token.clone(),
			settings.provisioning_timeout(),
		)?;

		let cache: Arc<dyn CacheInvalidator> = match &settings.cache_invalidation_url {
			Some(url) => Arc::new(HttpCacheInvalidator::new(
				url.clone(),
				settings.provisioning_timeout(),
			)?),
			None => Arc::new(LogCacheInvalidator),
		};

		Ok(Self {
			ledger: Arc::new(PgLedger::new(pool.clone())),
			resolver: Arc::new(PgCompanyResolver::new(pool.clone())),
			store: Arc::new(PgDirectory::new(pool)),
			lock,
			client: Arc::new(client),
			cache,
		})
	}
}

/// A wired sync engine: trigger intake on one side, the scheduler on the
/// other, sharing the ledger between them.
pub struct Engine {
	pub ledger: Arc<dyn EventLedger>,
	pub intake: TriggerIntake,
	pub scheduler: Scheduler,
	pub metrics: Arc<MetricsRegistry>,
}

impl Engine {
	pub fn assemble(parts: Components, config: SchedulerConfig, metrics: Arc<MetricsRegistry>) -> Self {
		let sequence = SequenceSyncer::new(parts.client.clone(), metrics.clone());
		let snapshot = SnapshotSyncer::new(parts.client, parts.resolver, parts.store, metrics.clone());
		let orchestrator = OrgSyncOrchestrator::new(sequence, snapshot, parts.cache, metrics.clone());
		let processor = Arc::new(EventProcessor::new(
			parts.ledger.clone(),
			orchestrator,
			metrics.clone(),
		));
		let scheduler = Scheduler::new(
			parts.ledger.clone(),
			CompanyLockManager::new(parts.lock),
			processor,
			metrics.clone(),
			config,
		);

		Self {
			intake: TriggerIntake::new(parts.ledger.clone(), metrics.clone()),
			ledger: parts.ledger,
			scheduler,
			metrics,
		}
	}
}

/// Connect, migrate, and poll until ctrl-c.
pub async fn run(settings: Settings, metrics: Arc<MetricsRegistry>) -> Result<()> {
	let pool = db::connect(&settings).await?;
	db::migrate(&pool).await?;

	let parts = Components::from_settings(&settings, pool)?;
	let engine = Engine::assemble(parts, SchedulerConfig::from(&settings), metrics);

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	tokio::spawn(async move {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!("Failed to listen for shutdown signal: {}", e);
			return;
		}
		info!("Shutdown requested");
		let _ = shutdown_tx.send(true);
	});

	engine.scheduler.run(shutdown_rx).await;
	info!("Final metrics:\n{}", engine.metrics.encode());
	Ok(())
}
