pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};

use std::sync::Arc;

/// Global observability state
pub struct ObservabilityState {
	pub metrics: Arc<MetricsRegistry>,
}

/// Initialize logging and the metrics registry
pub fn init_observability(level: log::Level) -> anyhow::Result<ObservabilityState> {
	init_logging(level)?;
	let metrics = init_metrics()?;

	tracing::info!(
		component = "observability",
		"Observability initialized: structured logging and metrics enabled"
	);

	Ok(ObservabilityState { metrics })
}
