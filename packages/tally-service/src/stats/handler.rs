use std::collections::BTreeMap;

use serde_json::Value;

use crate::{BoxFuture, Query, Result, stats::StatValue};
use tally_search::{SearchEngine, aggs, dsl};

/// One metric's values keyed by bucket key.
pub type MetricTable = BTreeMap<String, StatValue>;

const BUCKETS_AGG: &str = "buckets";
const VALUE_AGG: &str = "value";

/// Runs one filter plus aggregation for a query and returns raw per-bucket values.
///
/// Handlers must not keep state between calls; a bundle runs them concurrently.
pub trait MetricHandler
where
	Self: Send + Sync,
{
	fn fetch<'a>(
		&'a self,
		engine: &'a dyn SearchEngine,
		query: &'a Query,
	) -> BoxFuture<'a, Result<MetricTable>>;
}

/// Where a metric's documents live and which extra clauses select them.
#[derive(Clone, Debug)]
pub struct MetricSource {
	/// Index name prefix; the searched pattern is `<prefix>-<tenant>-*`.
	pub index_prefix: String,
	pub time_field: String,
	pub term_agg_size: u32,
	pub filter: Vec<Value>,
	pub must_not: Vec<Value>,
}
impl MetricSource {
	pub fn new(
		index_prefix: impl Into<String>,
		time_field: impl Into<String>,
		term_agg_size: u32,
	) -> Self {
		Self {
			index_prefix: index_prefix.into(),
			time_field: time_field.into(),
			term_agg_size,
			filter: Vec::new(),
			must_not: Vec::new(),
		}
	}

	pub fn filter(mut self, clause: Value) -> Self {
		self.filter.push(clause);

		self
	}

	pub fn must_not(mut self, clause: Value) -> Self {
		self.must_not.push(clause);

		self
	}

	pub fn index(&self, tenant_id: &str) -> String {
		format!("{}-{tenant_id}-*", self.index_prefix)
	}

	fn request(&self, query: &Query, sub: Option<(&str, Value)>) -> Result<Value> {
		let mut filter = query.base_filter(&self.time_field)?;

		for clause in &self.filter {
			filter = filter.filter(clause.clone());
		}
		for clause in &self.must_not {
			filter = filter.must_not(clause.clone());
		}

		let mut agg = query.bucket_aggregation(&self.time_field, self.term_agg_size)?;

		if let Some((name, sub)) = sub {
			agg = dsl::with_sub_aggregation(agg, name, sub);
		}

		Ok(dsl::aggregation_request(filter.into_query(), BUCKETS_AGG, agg))
	}
}

/// Counts matching documents per bucket.
#[derive(Clone, Debug)]
pub struct DocCountHandler {
	pub source: MetricSource,
}
impl DocCountHandler {
	pub fn new(source: MetricSource) -> Self {
		Self { source }
	}
}
impl MetricHandler for DocCountHandler {
	fn fetch<'a>(
		&'a self,
		engine: &'a dyn SearchEngine,
		query: &'a Query,
	) -> BoxFuture<'a, Result<MetricTable>> {
		Box::pin(async move {
			let body = self.source.request(query, None)?;
			let response = engine.search(&self.source.index(&query.tenant_id), &body).await?;

			Ok(into_table(aggs::bucket_counts(&response, BUCKETS_AGG)?))
		})
	}
}

/// Counts distinct values of `field` per bucket.
#[derive(Clone, Debug)]
pub struct CardinalityHandler {
	pub source: MetricSource,
	pub field: String,
}
impl CardinalityHandler {
	pub fn new(source: MetricSource, field: impl Into<String>) -> Self {
		Self { source, field: field.into() }
	}
}
impl MetricHandler for CardinalityHandler {
	fn fetch<'a>(
		&'a self,
		engine: &'a dyn SearchEngine,
		query: &'a Query,
	) -> BoxFuture<'a, Result<MetricTable>> {
		Box::pin(async move {
			let body =
				self.source.request(query, Some((VALUE_AGG, dsl::cardinality_agg(&self.field))))?;
			let response = engine.search(&self.source.index(&query.tenant_id), &body).await?;

			Ok(into_table(aggs::bucket_sub_values(&response, BUCKETS_AGG, VALUE_AGG)?))
		})
	}
}

/// Counts documents per bucket whose `field` is present and non-empty.
#[derive(Clone, Debug)]
pub struct PresentFieldHandler {
	inner: DocCountHandler,
}
impl PresentFieldHandler {
	pub fn new(source: MetricSource, field: &str) -> Self {
		let source = source.filter(dsl::exists(field)).must_not(dsl::term(field, ""));

		Self { inner: DocCountHandler::new(source) }
	}
}
impl MetricHandler for PresentFieldHandler {
	fn fetch<'a>(
		&'a self,
		engine: &'a dyn SearchEngine,
		query: &'a Query,
	) -> BoxFuture<'a, Result<MetricTable>> {
		self.inner.fetch(engine, query)
	}
}

fn into_table(counts: BTreeMap<String, i64>) -> MetricTable {
	counts.into_iter().map(|(key, count)| (key, StatValue::Count(count))).collect()
}
