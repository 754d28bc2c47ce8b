pub mod export;
pub mod housekeeping;
pub mod marking;
pub mod query;
pub mod stats;
pub mod tags;

mod error;

pub use error::{Error, Result};
pub use export::{Download, ExportArtifact, ExportOutcome, Exporter};
pub use marking::{
	MarkError, ReconcileOutcome, Reconciler, RecordUpdate, SimilarQuestionError,
	SimilarQuestionStore,
};
pub use query::{AggregationMode, Query, QueryFilters, ScoreRange};
pub use stats::{MergedStats, MetricBundle, StatValue};
pub use tags::TagCatalog;
pub use tally_search::BoxFuture;

use std::sync::Arc;

use tokio::{fs, task::JoinHandle};
use uuid::Uuid;

use tally_config::Config;
use tally_search::SearchEngine;
use tally_storage::TaskStore;

const INTERRUPTED_MESSAGE: &str = "Interrupted by restart.";

pub struct TallyService {
	pub cfg: Config,
	pub engine: Arc<dyn SearchEngine>,
	pub tags: Arc<TagCatalog>,
	pub exporter: Exporter,
}
impl TallyService {
	pub fn new(
		cfg: Config,
		engine: Arc<dyn SearchEngine>,
		store: Arc<dyn TaskStore>,
		tags: Arc<TagCatalog>,
	) -> Result<Self> {
		let exporter = Exporter::from_config(&cfg, Arc::clone(&engine), store)?;

		Ok(Self { cfg, engine, tags, exporter })
	}

	/// Prepares the process that runs exports: fails tasks a previous run left RUNNING, then
	/// reclaims expired output once a day on a background task.
	///
	/// Call once at boot, before admitting exports.
	pub async fn start(&self) -> Result<JoinHandle<Result<()>>> {
		let exporter = &self.exporter;
		let interrupted = exporter.store.fail_running_tasks(INTERRUPTED_MESSAGE).await?;

		if interrupted > 0 {
			tracing::warn!(interrupted, "Marked interrupted export tasks as failed.");
		}

		fs::create_dir_all(&exporter.base_dir).await?;

		tracing::info!(base_dir = %exporter.base_dir.display(), "Export housekeeping scheduled.");

		Ok(tokio::spawn(housekeeping::run(
			Arc::clone(&exporter.store),
			exporter.base_dir.clone(),
			exporter.offset,
		)))
	}

	pub async fn call_stats(&self, query: Query) -> Result<MergedStats> {
		require_by_time(&query, "Call")?;

		self.fetch_stats(query, &stats::bundles::call_stats(&self.cfg.search)).await
	}

	pub async fn visit_stats(&self, query: Query) -> Result<MergedStats> {
		self.fetch_stats(query, &stats::bundles::visit_stats(&self.cfg.search)).await
	}

	pub async fn session_stats(&self, query: Query) -> Result<MergedStats> {
		require_by_time(&query, "Session")?;

		self.fetch_stats(query, &stats::bundles::session_stats(&self.cfg.search)).await
	}

	/// Runs `bundle` for `query`. By-tag results are normalized against the tenant's tags.
	pub async fn fetch_stats(&self, query: Query, bundle: &MetricBundle) -> Result<MergedStats> {
		let query = Arc::new(query);
		let mut merged =
			stats::fetch_bundle(Arc::clone(&self.engine), Arc::clone(&query), bundle).await?;

		if let Some(tag_type) = query.tag_type() {
			self.tags.normalize_stats(&mut merged, &query.tenant_id, tag_type);
		}

		Ok(merged)
	}

	/// Starts a background export of the visit records matching `query`.
	pub async fn start_records_export(&self, query: &Query, locale: Option<&str>) -> Result<Uuid> {
		let locale = locale.unwrap_or(&self.cfg.export.default_locale);
		let writer =
			Arc::new(export::records::records_sheet_writer(&self.cfg.export.default_locale));
		let option = export::records::records_export_option(&self.cfg, query, writer)?;

		self.exporter.start_export(option, &query.tenant_id, locale).await
	}
}

fn require_by_time(query: &Query, surface: &str) -> Result<()> {
	match query.mode {
		AggregationMode::ByTime => Ok(()),
		AggregationMode::ByTag { .. } => Err(Error::InvalidRequest {
			message: format!("{surface} statistics are only available by time."),
		}),
	}
}
