use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use vanopticon_mimir::ingest::TriggerIntake;
use vanopticon_mimir::ledger::{EventLedger, PgLedger};
use vanopticon_mimir::{config, db, observability, run};

#[derive(Parser)]
#[command(name = "mimir", about = "Mimir - organization directory sync engine")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the sync scheduler (default)
	Run,
	/// Apply database migrations and exit
	Migrate,
	/// Record triggers from newline-delimited JSON
	Ingest {
		/// File to read; stdin when omitted
		#[arg(long)]
		file: Option<PathBuf>,
	},
	/// Move a FAILED event back to PENDING
	Replay {
		#[arg(long)]
		event_id: i64,
	},
	/// Show the most recent failures for a company
	Failures {
		#[arg(long)]
		company: String,
		#[arg(long, default_value_t = 20)]
		limit: i64,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let settings = match config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to load config, using defaults: {}", e);
			config::Settings::default()
		}
	};
	let obs = observability::init_observability(settings.log_level)?;

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Run => run(settings, obs.metrics).await?,
		Commands::Migrate => {
			let pool = db::connect(&settings).await?;
			db::migrate(&pool).await?;
			println!("Migrations applied.");
		}
		Commands::Ingest { file } => {
			let pool = db::connect(&settings).await?;
			let intake = TriggerIntake::new(std::sync::Arc::new(PgLedger::new(pool)), obs.metrics);
			let counts = match file {
				Some(path) => {
					let f = tokio::fs::File::open(&path)
						.await
						.with_context(|| format!("failed to open {}", path.display()))?;
					intake.accept_ndjson(BufReader::new(f)).await?
				}
				None => intake.accept_ndjson(BufReader::new(tokio::io::stdin())).await?,
			};
			println!(
				"recorded={} duplicate={} discarded={}",
				counts.recorded, counts.duplicate, counts.discarded
			);
		}
		Commands::Replay { event_id } => {
			let ledger = PgLedger::new(db::connect(&settings).await?);
			if ledger.requeue(event_id).await? {
				println!("Event {} requeued.", event_id);
			} else {
				println!("Event {} is not FAILED; nothing to do.", event_id);
			}
		}
		Commands::Failures { company, limit } => {
			let ledger = PgLedger::new(db::connect(&settings).await?);
			for f in ledger.recent_failures(&company, limit).await? {
				println!(
					"{}\t{}\tlog_seq={:?}\t{}",
					f.created_at.to_rfc3339(),
					f.company_key,
					f.log_seq,
					f.error_detail.lines().next().unwrap_or_default()
				);
			}
		}
	}

	Ok(())
}
