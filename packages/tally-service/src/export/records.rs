//! Export of visit records.

use std::sync::Arc;

use serde_json::Value;
use time::{
	OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339,
	macros::format_description,
};

use crate::{
	Query, Result,
	export::{Cell, ExportRow, ExportTaskOption, SheetWriter, XlsxSheetWriter},
	stats::bundles::RECORD_TIME_FIELD,
};
use tally_search::{Hit, dsl};

pub const RECORD_FIELDS: [&str; 8] =
	["user_id", "user_q", "score", "std_q", "log_time", "emotion", "module", "answer"];

const ZH_CN_HEADERS: [&str; 8] =
	["用户ID", "用户问题", "匹配分数", "标准问题", "访问时间", "情感", "问答类别", "机器人回答"];
const EN_US_HEADERS: [&str; 8] = [
	"User ID",
	"User question",
	"Score",
	"Standard question",
	"Log time",
	"Emotion",
	"Module",
	"Answer",
];

pub fn records_sheet_writer(default_locale: &str) -> XlsxSheetWriter {
	XlsxSheetWriter::new("records", default_locale)
		.with_headers("zh-cn", &ZH_CN_HEADERS)
		.with_headers("en-us", &EN_US_HEADERS)
}

/// Export option for the visit records matching `query`.
pub fn records_export_option(
	cfg: &tally_config::Config,
	query: &Query,
	writer: Arc<dyn SheetWriter>,
) -> Result<ExportTaskOption> {
	let filter = query
		.base_filter(RECORD_TIME_FIELD)?
		.must_not(dsl::term("user_q.keyword", "welcome_tag"))
		.into_query();
	let offset = query.window.offset();

	Ok(ExportTaskOption {
		index: format!("{}-{}-*", cfg.search.records_index, query.tenant_id),
		filter,
		sort_field: RECORD_TIME_FIELD.to_string(),
		source_fields: RECORD_FIELDS.iter().map(|field| field.to_string()).collect(),
		extractor: Arc::new(move |hit: &Hit| Ok(record_row(&hit.source, offset))),
		writer,
	})
}

fn record_row(source: &Value, offset: UtcOffset) -> ExportRow {
	let text = |field: &str| match source.get(field) {
		Some(Value::String(value)) => Cell::Text(value.clone()),
		Some(Value::Number(value)) => Cell::Text(value.to_string()),
		_ => Cell::Empty,
	};
	let score = match source.get("score").and_then(Value::as_f64) {
		Some(score) => Cell::Number(score),
		None => Cell::Empty,
	};
	let log_time = match source.get("log_time").and_then(Value::as_str) {
		Some(raw) => Cell::Text(local_time(raw, offset)),
		None => Cell::Empty,
	};
	let answer = source
		.get("answer")
		.and_then(Value::as_array)
		.map(|answers| {
			answers
				.iter()
				.filter_map(|answer| answer.get("value").and_then(Value::as_str))
				.collect::<Vec<_>>()
				.join(", ")
		})
		.map(Cell::Text)
		.unwrap_or(Cell::Empty);

	ExportRow::new(vec![
		text("user_id"),
		text("user_q"),
		score,
		text("std_q"),
		log_time,
		text("emotion"),
		text("module"),
		answer,
	])
}

/// Stored timestamps are UTC; sheets show them in the configured offset.
fn local_time(raw: &str, offset: UtcOffset) -> String {
	let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

	OffsetDateTime::parse(raw, &Rfc3339)
		.ok()
		.and_then(|at| at.to_offset(offset).format(format).ok())
		.unwrap_or_else(|| raw.to_string())
}
