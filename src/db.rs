use anyhow::{Context, Result};
use log::info;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Settings;

/// Build the shared pool. Each held company lock pins one connection, so
/// `db_max_connections` should exceed `max_workers`.
pub async fn connect(settings: &Settings) -> Result<PgPool> {
	PgPoolOptions::new()
		.max_connections(settings.db_max_connections)
		.connect(settings.database_url.as_str())
		.await
		.with_context(|| format!("failed to connect to {}", settings.database_url.host_str().unwrap_or("database")))
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
	info!("Running database migrations");
	sqlx::migrate!("./migrations")
		.run(pool)
		.await
		.context("database migration failed")?;
	info!("Migrations complete");
	Ok(())
}
