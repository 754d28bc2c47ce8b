use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result};
use tally_search::dsl::{self, BoolFilter, QueryTags, TimeWindow};

/// How aggregated counts are partitioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AggregationMode {
	ByTime,
	ByTag { tag_type: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
	pub min: Option<f64>,
	pub max: Option<f64>,
}

/// Optional narrowing applied on top of tenant and time range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
	#[serde(default)]
	pub tags: Vec<QueryTags>,
	#[serde(default)]
	pub modules: Vec<String>,
	#[serde(default)]
	pub emotions: Vec<String>,
	pub keyword: Option<String>,
	pub user_id: Option<String>,
	pub score: Option<ScoreRange>,
}

/// One analytics request. Shared read-only by every metric handler of a bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
	pub tenant_id: String,
	pub window: TimeWindow,
	pub mode: AggregationMode,
	pub filters: QueryFilters,
}
impl Query {
	pub fn new(
		tenant_id: impl Into<String>,
		window: TimeWindow,
		mode: AggregationMode,
	) -> Result<Self> {
		let tenant_id = tenant_id.into();

		if tenant_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "tenant_id must be non-empty.".to_string(),
			});
		}
		if let AggregationMode::ByTag { tag_type } = &mode
			&& tag_type.trim().is_empty()
		{
			return Err(Error::InvalidRequest {
				message: "tag_type must be non-empty when aggregating by tag.".to_string(),
			});
		}

		Ok(Self { tenant_id, window, mode, filters: QueryFilters::default() })
	}

	pub fn with_filters(mut self, filters: QueryFilters) -> Self {
		self.filters = filters;

		self
	}

	pub fn tag_type(&self) -> Option<&str> {
		match &self.mode {
			AggregationMode::ByTag { tag_type } => Some(tag_type),
			AggregationMode::ByTime => None,
		}
	}

	/// Tenant, time range and user filters over documents timestamped by `time_field`.
	pub fn base_filter(&self, time_field: &str) -> Result<BoolFilter> {
		let mut filter = BoolFilter::for_tenant(&self.tenant_id)
			.filter(self.window.range_filter(time_field)?)
			.any_of(dsl::tag_filter_combinations(&self.filters.tags));

		if !self.filters.modules.is_empty() {
			filter = filter.filter(dsl::terms("module", &self.filters.modules));
		}
		if !self.filters.emotions.is_empty() {
			filter = filter.filter(dsl::terms("emotion", &self.filters.emotions));
		}
		if let Some(keyword) =
			self.filters.keyword.as_deref().filter(|keyword| !keyword.is_empty())
		{
			filter = filter.filter(json!({
				"multi_match": { "query": keyword, "fields": ["user_q", "answer.value"] }
			}));
		}
		if let Some(user_id) =
			self.filters.user_id.as_deref().filter(|user_id| !user_id.is_empty())
		{
			filter = filter.filter(dsl::term("user_id", user_id));
		}
		if let Some(score) = &self.filters.score {
			filter = filter.filter(score_filter(score)?);
		}
		if let AggregationMode::ByTag { tag_type } = &self.mode {
			filter = filter.filter(dsl::exists(&dsl::tag_field(tag_type)));
		}

		Ok(filter)
	}

	/// The bucketing aggregation for this query's mode.
	pub fn bucket_aggregation(&self, time_field: &str, term_agg_size: u32) -> Result<Value> {
		match &self.mode {
			AggregationMode::ByTime => Ok(self.window.date_histogram(time_field)?),
			AggregationMode::ByTag { tag_type } =>
				Ok(dsl::terms_agg(&dsl::tag_field(tag_type), term_agg_size)),
		}
	}

	/// Every bucket key a complete by-time table must carry; empty for by-tag queries.
	pub fn scaffold_keys(&self) -> Result<Vec<String>> {
		match self.mode {
			AggregationMode::ByTime => Ok(self.window.bucket_keys()?),
			AggregationMode::ByTag { .. } => Ok(Vec::new()),
		}
	}
}

fn score_filter(score: &ScoreRange) -> Result<Value> {
	if let (Some(min), Some(max)) = (score.min, score.max)
		&& min > max
	{
		return Err(Error::InvalidRequest {
			message: format!("Score range is inverted: {min} > {max}."),
		});
	}

	let mut range = serde_json::Map::new();

	if let Some(min) = score.min {
		range.insert("gte".to_string(), json!(min));
	}
	if let Some(max) = score.max {
		range.insert("lte".to_string(), json!(max));
	}

	Ok(json!({ "range": { "score": range } }))
}
