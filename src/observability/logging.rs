use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging to stdout.
///
/// `RUST_LOG` wins when set; otherwise `default_level` from the settings
/// applies. `log` records from the rest of the crate are bridged in.
pub fn init_logging(default_level: log::Level) -> anyhow::Result<()> {
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(default_level.as_str().to_ascii_lowercase()))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let json_layer = tracing_subscriber::fmt::layer()
		.json()
		.with_current_span(true)
		.with_span_list(true)
		.with_target(true)
		.with_level(true)
		.with_thread_ids(true);

	tracing_subscriber::registry()
		.with(env_filter)
		.with(json_layer)
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn logging_initialization() {
		// only the first init in a process can succeed
		let _ = super::init_logging(log::Level::Debug);
		assert!(super::init_logging(log::Level::Debug).is_err());
	}
}
