//! Bulk export of matching documents into spreadsheet files.
//!
//! A run is admitted per tenant through the task store, scrolls the search engine, flushes rows
//! into sheet files of bounded size and packages them. Its outcome is only ever visible through the
//! persisted task.

pub mod archive;
pub mod download;
pub mod pipeline;
pub mod records;
pub mod sheet;

pub use download::{Download, ExportArtifact};
pub use pipeline::{ExportOutcome, Exporter};
pub use sheet::{SheetRequest, SheetWriter, XlsxSheetWriter};

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::Result;
use tally_search::Hit;

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
	Text(String),
	Number(f64),
	Empty,
}
impl From<&str> for Cell {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}
impl From<String> for Cell {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}
impl From<f64> for Cell {
	fn from(value: f64) -> Self {
		Self::Number(value)
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportRow {
	pub cells: Vec<Cell>,
}
impl ExportRow {
	pub fn new(cells: Vec<Cell>) -> Self {
		Self { cells }
	}
}

/// Turns one search hit into one sheet row.
pub type HitExtractor = Arc<dyn Fn(&Hit) -> Result<ExportRow> + Send + Sync>;

/// Everything one run needs; built by the caller and consumed once.
#[derive(Clone)]
pub struct ExportTaskOption {
	pub index: String,
	pub filter: Value,
	pub sort_field: String,
	/// Source fields to fetch; empty fetches whole documents.
	pub source_fields: Vec<String>,
	pub extractor: HitExtractor,
	pub writer: Arc<dyn SheetWriter>,
}
impl fmt::Debug for ExportTaskOption {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExportTaskOption")
			.field("index", &self.index)
			.field("filter", &self.filter)
			.field("sort_field", &self.sort_field)
			.field("source_fields", &self.source_fields)
			.finish_non_exhaustive()
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportLimits {
	/// Hits fetched per scroll page.
	pub page_size: u32,
	/// Rows per sheet file.
	pub max_rows_per_file: usize,
	pub keep_alive: String,
}
impl ExportLimits {
	pub fn from_config(cfg: &tally_config::Export) -> Self {
		Self {
			page_size: cfg.page_size,
			max_rows_per_file: cfg.max_rows_per_file as usize,
			keep_alive: cfg.scroll_keep_alive.clone(),
		}
	}
}
