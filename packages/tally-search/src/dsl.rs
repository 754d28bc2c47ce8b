//! Engine-agnostic filter and bucketing descriptors.
//!
//! Everything here is pure: a tenant id, a time window and optional tag selections go in, JSON
//! clauses in the engine's query DSL come out.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::{
	Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
	format_description::well_known::Rfc3339, macros::format_description,
};

use crate::{Error, Result};

pub const TENANT_FIELD: &str = "app_id";

const HISTOGRAM_KEY_FORMAT: &str = "yyyy-MM-dd'T'HH:mm:ssXXX";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
	Year,
	Month,
	Day,
	Hour,
	Minute,
	Second,
}
impl Interval {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Year => "year",
			Self::Month => "month",
			Self::Day => "day",
			Self::Hour => "hour",
			Self::Minute => "minute",
			Self::Second => "second",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"year" => Ok(Self::Year),
			"month" => Ok(Self::Month),
			"day" => Ok(Self::Day),
			"hour" => Ok(Self::Hour),
			"minute" => Ok(Self::Minute),
			"second" => Ok(Self::Second),
			other => Err(Error::InvalidQuery { message: format!("Unknown interval {other:?}.") }),
		}
	}

	/// Start of the bucket containing `at`.
	pub fn truncate(self, at: OffsetDateTime) -> Result<OffsetDateTime> {
		let date = at.date();
		let truncated = match self {
			Self::Year => at
				.replace_date(first_of_month(date.year(), Month::January)?)
				.replace_time(Time::MIDNIGHT),
			Self::Month => at
				.replace_date(first_of_month(date.year(), date.month())?)
				.replace_time(Time::MIDNIGHT),
			Self::Day => at.replace_time(Time::MIDNIGHT),
			Self::Hour => at.replace_time(hms(at.hour(), 0, 0)?),
			Self::Minute => at.replace_time(hms(at.hour(), at.minute(), 0)?),
			Self::Second => at.replace_time(hms(at.hour(), at.minute(), at.second())?),
		};

		Ok(truncated)
	}

	/// Start of the bucket following the one that starts at `bucket_start`.
	pub fn advance(self, bucket_start: OffsetDateTime) -> Result<OffsetDateTime> {
		let date = bucket_start.date();
		let next = match self {
			Self::Year =>
				bucket_start.replace_date(first_of_month(date.year() + 1, Month::January)?),
			Self::Month => {
				let (year, month) = match date.month() {
					Month::December => (date.year() + 1, Month::January),
					month => (date.year(), month.next()),
				};

				bucket_start.replace_date(first_of_month(year, month)?)
			},
			Self::Day => bucket_start + Duration::days(1),
			Self::Hour => bucket_start + Duration::hours(1),
			Self::Minute => bucket_start + Duration::minutes(1),
			Self::Second => bucket_start + Duration::seconds(1),
		};

		Ok(next)
	}
}

/// Half-open time range `[start, end)` bucketed by `interval` in the offset of `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeWindow {
	pub start: OffsetDateTime,
	pub end: OffsetDateTime,
	pub interval: Interval,
}
impl TimeWindow {
	pub fn new(start: OffsetDateTime, end: OffsetDateTime, interval: Interval) -> Result<Self> {
		if start >= end {
			return Err(Error::InvalidQuery {
				message: "Time window start must be before its end.".to_string(),
			});
		}

		Ok(Self { start, end: end.to_offset(start.offset()), interval })
	}

	/// Whole days `[first, last]` in `offset`; the usual shape of dashboard queries.
	pub fn days(first: Date, last: Date, offset: UtcOffset, interval: Interval) -> Result<Self> {
		let start = PrimitiveDateTime::new(first, Time::MIDNIGHT).assume_offset(offset);
		let end =
			PrimitiveDateTime::new(last, Time::MIDNIGHT).assume_offset(offset) + Duration::days(1);

		Self::new(start, end, interval)
	}

	pub fn offset(&self) -> UtcOffset {
		self.start.offset()
	}

	pub fn range_filter(&self, field: &str) -> Result<Value> {
		Ok(json!({
			"range": {
				field: {
					"gte": format_rfc3339(self.start)?,
					"lt": format_rfc3339(self.end)?,
					"format": "strict_date_optional_time",
				}
			}
		}))
	}

	pub fn date_histogram(&self, field: &str) -> Result<Value> {
		let last = self.interval.truncate(self.end - Duration::seconds(1))?;

		Ok(json!({
			"date_histogram": {
				"field": field,
				"calendar_interval": self.interval.as_str(),
				"time_zone": format_offset(self.offset()),
				"format": HISTOGRAM_KEY_FORMAT,
				"min_doc_count": 0,
				"extended_bounds": {
					"min": format_rfc3339(self.interval.truncate(self.start)?)?,
					"max": format_rfc3339(last)?,
				},
			}
		}))
	}

	/// Every bucket key the window covers, in chronological order.
	pub fn bucket_keys(&self) -> Result<Vec<String>> {
		let mut keys = Vec::new();
		let mut cursor = self.interval.truncate(self.start)?;

		while cursor < self.end {
			keys.push(format_rfc3339(cursor)?);

			cursor = self.interval.advance(cursor)?;
		}

		Ok(keys)
	}
}

/// Tag values selected for one tag type, e.g. `platform = [android, ios]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTags {
	pub tag_type: String,
	pub values: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BoolFilter {
	filter: Vec<Value>,
	must_not: Vec<Value>,
	should: Vec<Value>,
}
impl BoolFilter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn for_tenant(tenant_id: &str) -> Self {
		let mut filter = Self::new();

		if !tenant_id.is_empty() {
			filter.filter.push(term(TENANT_FIELD, tenant_id));
		}

		filter
	}

	pub fn filter(mut self, clause: Value) -> Self {
		self.filter.push(clause);

		self
	}

	pub fn must_not(mut self, clause: Value) -> Self {
		self.must_not.push(clause);

		self
	}

	/// Adds an any-of group; at least one of `clauses` must match.
	pub fn any_of(mut self, clauses: Vec<Value>) -> Self {
		if !clauses.is_empty() {
			self.should.push(json!({ "bool": { "should": clauses, "minimum_should_match": 1 } }));
		}

		self
	}

	pub fn into_query(self) -> Value {
		let mut filter = self.filter;

		filter.extend(self.should);

		json!({ "bool": { "filter": filter, "must_not": self.must_not } })
	}
}

pub fn term(field: &str, value: impl Into<Value>) -> Value {
	let value: Value = value.into();

	json!({ "term": { field: value } })
}

pub fn terms(field: &str, values: &[String]) -> Value {
	json!({ "terms": { field: values } })
}

pub fn exists(field: &str) -> Value {
	json!({ "exists": { "field": field } })
}

pub fn ids(ids: &[String]) -> Value {
	json!({ "ids": { "values": ids } })
}

pub fn terms_agg(field: &str, size: u32) -> Value {
	json!({ "terms": { "field": field, "size": size } })
}

pub fn cardinality_agg(field: &str) -> Value {
	json!({ "cardinality": { "field": field } })
}

/// Attaches `sub` under `name` to an aggregation body built by this module.
pub fn with_sub_aggregation(mut agg: Value, name: &str, sub: Value) -> Value {
	if let Some(object) = agg.as_object_mut() {
		object.insert("aggs".to_string(), json!({ name: sub }));
	}

	agg
}

/// Size-zero aggregation request.
pub fn aggregation_request(query: Value, agg_name: &str, agg: Value) -> Value {
	json!({ "size": 0, "query": query, "aggs": { agg_name: agg } })
}

pub fn tag_field(tag_type: &str) -> String {
	format!("custom_info.{tag_type}.keyword")
}

/// Expands tag selections into one `bool.filter` per combination of values across tag types.
///
/// `[platform: [android, ios], sex: [m, f]]` yields four filters, one per (platform, sex) pair.
/// Tag types with no selected values are ignored.
pub fn tag_filter_combinations(tags: &[QueryTags]) -> Vec<Value> {
	let selected = tags.iter().filter(|tags| !tags.values.is_empty()).collect::<Vec<_>>();

	if selected.is_empty() {
		return Vec::new();
	}

	let mut combinations: Vec<Vec<Value>> = vec![Vec::new()];

	for tags in selected {
		let field = tag_field(&tags.tag_type);
		let mut next = Vec::with_capacity(combinations.len() * tags.values.len());

		for prefix in &combinations {
			for value in &tags.values {
				let mut clauses = prefix.clone();

				clauses.push(term(&field, value.as_str()));
				next.push(clauses);
			}
		}

		combinations = next;
	}

	combinations.into_iter().map(|clauses| json!({ "bool": { "filter": clauses } })).collect()
}

pub fn format_rfc3339(at: OffsetDateTime) -> Result<String> {
	at.format(&Rfc3339)
		.map_err(|err| Error::InvalidQuery { message: format!("Unformattable timestamp: {err}.") })
}

/// Epoch seconds of a bucket key in RFC 3339 or `yyyy-MM-dd HH:mm:ss` (read in `offset`).
pub fn bucket_epoch(key: &str, offset: UtcOffset) -> Option<i64> {
	if let Ok(at) = OffsetDateTime::parse(key, &Rfc3339) {
		return Some(at.unix_timestamp());
	}

	let legacy = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

	PrimitiveDateTime::parse(key, legacy).ok().map(|at| at.assume_offset(offset).unix_timestamp())
}

pub fn format_offset(offset: UtcOffset) -> String {
	let (hours, minutes, _) = offset.as_hms();
	let sign = if hours < 0 || minutes < 0 { '-' } else { '+' };

	format!("{sign}{:02}:{:02}", hours.unsigned_abs(), minutes.unsigned_abs())
}

fn first_of_month(year: i32, month: Month) -> Result<Date> {
	Date::from_calendar_date(year, month, 1)
		.map_err(|err| Error::InvalidQuery { message: format!("Date out of range: {err}.") })
}

fn hms(hour: u8, minute: u8, second: u8) -> Result<Time> {
	Time::from_hms(hour, minute, second)
		.map_err(|err| Error::InvalidQuery { message: format!("Time out of range: {err}.") })
}
