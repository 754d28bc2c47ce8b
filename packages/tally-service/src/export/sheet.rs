use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use rust_xlsxwriter::{Format, Workbook};

use crate::{
	Error, Result,
	export::{Cell, ExportRow},
};

/// One batch to be written as one file.
#[derive(Debug)]
pub struct SheetRequest<'a> {
	pub rows: &'a [ExportRow],
	pub dir: &'a Path,
	/// File name without extension; the writer picks the extension.
	pub file_stem: &'a str,
	pub locale: &'a str,
	pub tenant_id: &'a str,
}

/// Sequential file sink for export batches. Called from a blocking thread.
pub trait SheetWriter
where
	Self: Send + Sync,
{
	fn write(&self, request: &SheetRequest<'_>) -> Result<PathBuf>;
}

/// Writes `.xlsx` workbooks with a header row chosen by locale.
#[derive(Clone, Debug)]
pub struct XlsxSheetWriter {
	sheet_name: String,
	headers: HashMap<String, Vec<String>>,
	default_locale: String,
}
impl XlsxSheetWriter {
	pub fn new(sheet_name: &str, default_locale: &str) -> Self {
		Self {
			sheet_name: sheet_name.to_string(),
			headers: HashMap::new(),
			default_locale: normalize_locale(default_locale),
		}
	}

	pub fn with_headers(mut self, locale: &str, headers: &[&str]) -> Self {
		self.headers.insert(
			normalize_locale(locale),
			headers.iter().map(|header| header.to_string()).collect(),
		);

		self
	}

	/// Headers for `locale`, falling back to the default locale.
	pub fn headers_for(&self, locale: &str) -> Option<&[String]> {
		self.headers
			.get(&normalize_locale(locale))
			.or_else(|| self.headers.get(&self.default_locale))
			.map(Vec::as_slice)
	}
}
impl SheetWriter for XlsxSheetWriter {
	fn write(&self, request: &SheetRequest<'_>) -> Result<PathBuf> {
		let path = request.dir.join(format!("{}.xlsx", request.file_stem));
		let mut workbook = Workbook::new();
		let bold = Format::new().set_bold();
		let worksheet = workbook.add_worksheet();

		worksheet.set_name(&self.sheet_name)?;

		let mut row_index: u32 = 0;

		if let Some(headers) = self.headers_for(request.locale) {
			for (col, header) in headers.iter().enumerate() {
				worksheet.write_string_with_format(row_index, column(col)?, header, &bold)?;
			}

			row_index += 1;
		}

		for row in request.rows {
			for (col, cell) in row.cells.iter().enumerate() {
				let col = column(col)?;

				match cell {
					Cell::Text(text) => {
						worksheet.write_string(row_index, col, text)?;
					},
					Cell::Number(number) => {
						worksheet.write_number(row_index, col, *number)?;
					},
					Cell::Empty => {},
				}
			}

			row_index += 1;
		}

		workbook.save(&path)?;

		tracing::debug!(
			tenant_id = request.tenant_id,
			path = %path.display(),
			rows = request.rows.len(),
			"Sheet written."
		);

		Ok(path)
	}
}

fn column(index: usize) -> Result<u16> {
	u16::try_from(index)
		.map_err(|_| Error::Sheet { message: format!("Column {index} is out of range.") })
}

fn normalize_locale(locale: &str) -> String {
	locale.trim().to_ascii_lowercase().replace('_', "-")
}
