use std::{
	mem,
	path::{Path, PathBuf},
	sync::Arc,
};

use serde_json::{Map, Value, json};
use time::{
	OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem, macros::format_description,
};
use tokio::{fs, task};
use uuid::Uuid;

use crate::{
	Error, Result,
	export::{ExportLimits, ExportRow, ExportTaskOption, SheetRequest, archive},
};
use tally_search::SearchEngine;
use tally_storage::TaskStore;

pub(crate) const DAY_DIR_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[year][month][day]");
const FILE_STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
	format_description!("[year][month][day]_[hour][minute][second]");

/// How a run ended, as persisted to the task store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
	Empty,
	Completed { path: PathBuf, rows: u64, files: usize },
	Failed { message: String },
}

enum Produced {
	Empty,
	Artifact { path: PathBuf, rows: u64, files: usize },
}

#[derive(Clone)]
pub struct Exporter {
	pub(crate) engine: Arc<dyn SearchEngine>,
	pub(crate) store: Arc<dyn TaskStore>,
	pub(crate) base_dir: PathBuf,
	pub(crate) limits: ExportLimits,
	pub(crate) offset: UtcOffset,
}
impl Exporter {
	pub fn new(
		engine: Arc<dyn SearchEngine>,
		store: Arc<dyn TaskStore>,
		base_dir: PathBuf,
		limits: ExportLimits,
		offset: UtcOffset,
	) -> Result<Self> {
		if limits.page_size == 0 || limits.max_rows_per_file == 0 {
			return Err(Error::InvalidRequest {
				message: "Export page size and rows per file must be greater than zero."
					.to_string(),
			});
		}

		Ok(Self { engine, store, base_dir, limits, offset })
	}

	pub fn from_config(
		cfg: &tally_config::Config,
		engine: Arc<dyn SearchEngine>,
		store: Arc<dyn TaskStore>,
	) -> Result<Self> {
		let offset =
			cfg.utc_offset().map_err(|err| Error::InvalidRequest { message: err.to_string() })?;
		let limits = ExportLimits::from_config(&cfg.export);

		Self::new(engine, store, cfg.export.base_dir.clone(), limits, offset)
	}

	pub fn base_dir(&self) -> &Path {
		&self.base_dir
	}

	/// Admits an export for `tenant_id` and runs it in the background.
	///
	/// Fails with [`Error::ExportInProgress`] while the tenant has a running export. Deleting the
	/// task later does not stop the run.
	pub async fn start_export(
		&self,
		option: ExportTaskOption,
		tenant_id: &str,
		locale: &str,
	) -> Result<Uuid> {
		let task_id = self.store.try_create_running(tenant_id).await.map_err(|err| match err {
			tally_storage::Error::Conflict(_) =>
				Error::ExportInProgress { tenant_id: tenant_id.to_string() },
			other => Error::from(other),
		})?;
		let exporter = self.clone();
		let tenant_id = tenant_id.to_string();
		let locale = locale.to_string();

		tokio::spawn(async move {
			exporter.run_export(task_id, option, &tenant_id, &locale).await;
		});

		Ok(task_id)
	}

	/// Runs an admitted task to its terminal status. Errors end up in the task, never here.
	pub async fn run_export(
		&self,
		task_id: Uuid,
		option: ExportTaskOption,
		tenant_id: &str,
		locale: &str,
	) -> ExportOutcome {
		tracing::info!(%task_id, tenant_id, index = %option.index, "Export started.");

		let (outcome, persisted) = match self.produce(task_id, &option, tenant_id, locale).await {
			Ok(Produced::Empty) => {
				tracing::info!(%task_id, "Export matched no documents.");

				(ExportOutcome::Empty, self.store.set_empty(task_id).await)
			},
			Ok(Produced::Artifact { path, rows, files }) => {
				let persisted = self.store.set_completed(task_id, &path.to_string_lossy()).await;

				tracing::info!(%task_id, rows, files, path = %path.display(), "Export completed.");

				(ExportOutcome::Completed { path, rows, files }, persisted)
			},
			Err(err) => {
				let message = err.user_message();

				tracing::error!(%task_id, error = %err, "Export failed.");

				let persisted = self.store.set_failed(task_id, &message).await;

				(ExportOutcome::Failed { message }, persisted)
			},
		};

		if let Err(err) = persisted {
			tracing::error!(%task_id, error = %err, "Failed to persist export status.");
		}

		outcome
	}

	async fn produce(
		&self,
		task_id: Uuid,
		option: &ExportTaskOption,
		tenant_id: &str,
		locale: &str,
	) -> Result<Produced> {
		let now = OffsetDateTime::now_utc().to_offset(self.offset);
		let dir = export_dir(&self.base_dir, now, tenant_id)?;
		let stem = artifact_stem(now, task_id)?;

		fs::create_dir_all(&dir).await?;

		let mut scroll_id = None;
		let mut files = Vec::new();
		let collected = self
			.collect_files(option, &dir, &stem, tenant_id, locale, &mut scroll_id, &mut files)
			.await;

		if let Some(scroll_id) = scroll_id
			&& let Err(err) = self.engine.clear_scroll(&scroll_id).await
		{
			tracing::warn!(%task_id, error = %err, "Failed to clear export scroll.");
		}

		let rows = match collected {
			Ok(rows) => rows,
			Err(err) => {
				remove_sheets(task_id, &files).await;

				return Err(err);
			},
		};

		match files.len() {
			0 => Ok(Produced::Empty),
			1 => Ok(Produced::Artifact { path: files[0].clone(), rows, files: 1 }),
			count => {
				let archive_path = dir.join(format!("{stem}.zip"));
				let sources = files.clone();
				let archived =
					task::spawn_blocking(move || archive::compress(&sources, &archive_path))
						.await
						.map_err(|err| Error::Archive { message: err.to_string() })
						.and_then(|result| result);

				// Sheets go either way; a failed archive fails the run.
				remove_sheets(task_id, &files).await;

				let path = archived?;

				tracing::info!(
					%task_id,
					files = count,
					path = %path.display(),
					"Export files archived."
				);

				Ok(Produced::Artifact { path, rows, files: count })
			},
		}
	}

	/// Scrolls every page into sheets. Written sheets land in `files` even when a later page fails.
	#[allow(clippy::too_many_arguments)]
	async fn collect_files(
		&self,
		option: &ExportTaskOption,
		dir: &Path,
		stem: &str,
		tenant_id: &str,
		locale: &str,
		scroll_id: &mut Option<String>,
		files: &mut Vec<PathBuf>,
	) -> Result<u64> {
		let body = scroll_body(option, self.limits.page_size);
		let keep_alive = self.limits.keep_alive.as_str();
		let mut page = self.engine.open_scroll(&option.index, &body, keep_alive).await?;
		let mut batch = Vec::new();
		let mut rows: u64 = 0;

		loop {
			if page.scroll_id.is_some() {
				scroll_id.clone_from(&page.scroll_id);
			}
			if page.hits.is_empty() {
				break;
			}

			tracing::trace!(hits = page.hits.len(), rows, "Fetched export page.");

			for hit in &page.hits {
				batch.push((option.extractor)(hit)?);

				rows += 1;

				if batch.len() >= self.limits.max_rows_per_file {
					let full = mem::take(&mut batch);
					let sequence = files.len() + 1;
					let path =
						self.flush(option, full, dir, stem, sequence, tenant_id, locale).await?;

					files.push(path);
				}
			}

			let Some(id) = scroll_id.as_deref() else {
				break;
			};

			page = self.engine.next_scroll(id, keep_alive).await?;
		}

		if !batch.is_empty() {
			let sequence = files.len() + 1;
			let path = self.flush(option, batch, dir, stem, sequence, tenant_id, locale).await?;

			files.push(path);
		}

		Ok(rows)
	}

	#[allow(clippy::too_many_arguments)]
	async fn flush(
		&self,
		option: &ExportTaskOption,
		rows: Vec<ExportRow>,
		dir: &Path,
		stem: &str,
		sequence: usize,
		tenant_id: &str,
		locale: &str,
	) -> Result<PathBuf> {
		let writer = Arc::clone(&option.writer);
		let dir = dir.to_path_buf();
		let file_stem = format!("{stem}_{sequence}");
		let locale = locale.to_string();
		let tenant_id = tenant_id.to_string();
		let count = rows.len();
		let path = task::spawn_blocking(move || {
			writer.write(&SheetRequest {
				rows: &rows,
				dir: &dir,
				file_stem: &file_stem,
				locale: &locale,
				tenant_id: &tenant_id,
			})
		})
		.await
		.map_err(|err| Error::Sheet { message: err.to_string() })??;

		tracing::info!(rows = count, path = %path.display(), "Export sheet written.");

		Ok(path)
	}
}

/// `<base>/<YYYYMMDD>/<tenant>/`.
pub fn export_dir(base_dir: &Path, now: OffsetDateTime, tenant_id: &str) -> Result<PathBuf> {
	if tenant_id.is_empty() || tenant_id.contains(['/', '\\']) || tenant_id == ".." {
		return Err(Error::InvalidRequest { message: format!("Invalid tenant id {tenant_id:?}.") });
	}

	let day = now
		.format(DAY_DIR_FORMAT)
		.map_err(|err| Error::InvalidRequest { message: err.to_string() })?;

	Ok(base_dir.join(day).join(tenant_id))
}

/// `<YYYYMMDD_HHMMSS>_<task id>`; sheets append `_<n>`, the archive appends `.zip`.
pub fn artifact_stem(now: OffsetDateTime, task_id: Uuid) -> Result<String> {
	let stamp = now
		.format(FILE_STAMP_FORMAT)
		.map_err(|err| Error::InvalidRequest { message: err.to_string() })?;

	Ok(format!("{stamp}_{}", task_id.simple()))
}

async fn remove_sheets(task_id: Uuid, files: &[PathBuf]) {
	for file in files {
		if let Err(err) = fs::remove_file(file).await {
			tracing::warn!(
				%task_id,
				path = %file.display(),
				error = %err,
				"Failed to remove export sheet."
			);
		}
	}
}

fn scroll_body(option: &ExportTaskOption, page_size: u32) -> Value {
	let sort_field = option.sort_field.as_str();
	let mut body = Map::new();

	body.insert("size".to_string(), json!(page_size));
	body.insert("query".to_string(), option.filter.clone());
	body.insert("sort".to_string(), json!([{ sort_field: { "order": "asc" } }]));

	if !option.source_fields.is_empty() {
		body.insert("_source".to_string(), json!(option.source_fields));
	}

	Value::Object(body)
}
