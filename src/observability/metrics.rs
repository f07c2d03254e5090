use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Central registry for the engine's Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Trigger intake
	pub triggers_recorded_total: IntCounter,
	pub triggers_duplicate_total: IntCounter,
	pub triggers_discarded_total: IntCounter,

	// Scheduler
	pub scheduler_ticks_total: IntCounter,
	pub scheduler_busy_skips_total: IntCounter,
	pub lock_contention_total: IntCounter,
	pub workers_in_flight: IntGauge,

	// Event processing
	pub events_completed_total: IntCounter,
	pub events_failed_total: IntCounter,
	pub event_duration_seconds: Histogram,

	// Synchronization
	pub sequence_calls_total: IntCounter,
	pub snapshots_applied_total: IntCounter,
	pub cache_invalidations_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
	let c = IntCounter::with_opts(Opts::new(name, help).namespace("mimir"))?;
	registry.register(Box::new(c.clone()))?;
	Ok(c)
}

impl MetricsRegistry {
	pub fn try_new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let triggers_recorded_total = counter(
			&registry,
			"triggers_recorded_total",
			"Sync triggers recorded as new ledger entries",
		)?;
		let triggers_duplicate_total = counter(
			&registry,
			"triggers_duplicate_total",
			"Sync triggers ignored as duplicates",
		)?;
		let triggers_discarded_total = counter(
			&registry,
			"triggers_discarded_total",
			"Malformed sync triggers discarded",
		)?;

		let scheduler_ticks_total = counter(&registry, "scheduler_ticks_total", "Scheduler poll ticks")?;
		let scheduler_busy_skips_total = counter(
			&registry,
			"scheduler_busy_skips_total",
			"Ticks skipped because every worker was busy",
		)?;
		let lock_contention_total = counter(
			&registry,
			"lock_contention_total",
			"Company lock acquisitions deferred to a later tick",
		)?;

		let workers_in_flight = IntGauge::with_opts(
			Opts::new("workers_in_flight", "Company sync tasks currently running").namespace("mimir"),
		)?;
		registry.register(Box::new(workers_in_flight.clone()))?;

		let events_completed_total = counter(
			&registry,
			"events_completed_total",
			"Ledger events processed successfully",
		)?;
		let events_failed_total = counter(
			&registry,
			"events_failed_total",
			"Ledger events that ended FAILED",
		)?;

		let event_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"event_duration_seconds",
				"Time spent synchronizing one ledger event",
			)
			.namespace("mimir")
			.buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0]),
		)?;
		registry.register(Box::new(event_duration_seconds.clone()))?;

		let sequence_calls_total = counter(
			&registry,
			"sequence_calls_total",
			"Incremental sequence requests sent to the provisioning service",
		)?;
		let snapshots_applied_total = counter(
			&registry,
			"snapshots_applied_total",
			"Snapshot payloads reconciled into the local directory",
		)?;
		let cache_invalidations_total = counter(
			&registry,
			"cache_invalidations_total",
			"Full cache invalidations signalled",
		)?;

		Ok(Self {
			registry,
			triggers_recorded_total,
			triggers_duplicate_total,
			triggers_discarded_total,
			scheduler_ticks_total,
			scheduler_busy_skips_total,
			lock_contention_total,
			workers_in_flight,
			events_completed_total,
			events_failed_total,
			event_duration_seconds,
			sequence_calls_total,
			snapshots_applied_total,
			cache_invalidations_total,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::warn!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

/// Build the shared metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::try_new()?))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::try_new().unwrap();
		assert!(!registry.encode().is_empty());
	}

	#[test]
	fn metrics_are_namespaced() {
		let registry = super::init_metrics().unwrap();
		registry.triggers_recorded_total.inc();
		registry.events_failed_total.inc_by(2);
		let text = registry.encode();
		assert!(text.contains("mimir_triggers_recorded_total 1"));
		assert!(text.contains("mimir_events_failed_total 2"));
	}
}
