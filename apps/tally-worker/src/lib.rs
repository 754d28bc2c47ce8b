use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_search::ElasticsearchClient;
use tally_service::{TagCatalog, TallyService};
use tally_storage::{PgTaskStore, db::Db};

/// Hosts the export pipeline: releases exports interrupted by a restart and reclaims expired
/// export output once a day.
#[derive(Debug, Parser)]
#[command(
	version = tally_cli::VERSION,
	rename_all = "kebab",
	styles = tally_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = tally_config::load(&args.config)?;
	let filter = EnvFilter::try_new(&config.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let engine = Arc::new(ElasticsearchClient::new(&config.search)?);
	let store = Arc::new(PgTaskStore::new(db.pool.clone()));
	let tags = Arc::new(TagCatalog::load(&db).await?);
	let service = TallyService::new(config, engine, store, tags)?;
	let housekeeping = service.start().await?;

	tracing::info!(base_dir = %service.cfg.export.base_dir.display(), "Worker started.");

	housekeeping.await??;

	Ok(())
}
