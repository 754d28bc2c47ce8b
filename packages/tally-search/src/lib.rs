pub mod aggs;
pub mod client;
pub mod dsl;

mod error;

pub use client::ElasticsearchClient;
pub use error::{Error, Result, root_cause_reasons};

use std::{future::Future, pin::Pin};

use serde_json::Value;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The narrow slice of a document search engine the analytics and export paths rely on.
pub trait SearchEngine
where
	Self: Send + Sync,
{
	/// Runs one search request and returns the raw response body.
	fn search<'a>(&'a self, index: &'a str, body: &'a Value) -> BoxFuture<'a, Result<Value>>;

	fn open_scroll<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
		keep_alive: &'a str,
	) -> BoxFuture<'a, Result<ScrollPage>>;

	fn next_scroll<'a>(
		&'a self,
		scroll_id: &'a str,
		keep_alive: &'a str,
	) -> BoxFuture<'a, Result<ScrollPage>>;

	fn clear_scroll<'a>(&'a self, scroll_id: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Applies a script to every document matching `query`; version conflicts are skipped.
	fn update_by_query<'a>(
		&'a self,
		index: &'a str,
		query: &'a Value,
		script: &'a Value,
	) -> BoxFuture<'a, Result<UpdateReport>>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Hit {
	pub id: String,
	pub index: String,
	pub source: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScrollPage {
	pub scroll_id: Option<String>,
	pub hits: Vec<Hit>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
	pub updated: u64,
	pub version_conflicts: u64,
}

/// Pulls `hits.hits[*]` out of a search or scroll response.
pub fn parse_hits(response: &Value) -> Result<Vec<Hit>> {
	let Some(hits) = response.get("hits").and_then(|hits| hits.get("hits")) else {
		return Ok(Vec::new());
	};
	let hits = hits.as_array().ok_or_else(|| Error::InvalidResponse {
		message: "hits.hits must be an array.".to_string(),
	})?;

	hits.iter()
		.map(|hit| -> Result<Hit> {
			let id = hit.get("_id").and_then(Value::as_str).ok_or_else(|| {
				Error::InvalidResponse { message: "Hit is missing _id.".to_string() }
			})?;

			Ok(Hit {
				id: id.to_string(),
				index: hit.get("_index").and_then(Value::as_str).unwrap_or_default().to_string(),
				source: hit.get("_source").cloned().unwrap_or(Value::Null),
			})
		})
		.collect()
}

pub fn parse_scroll_page(response: &Value) -> Result<ScrollPage> {
	Ok(ScrollPage {
		scroll_id: response.get("_scroll_id").and_then(Value::as_str).map(str::to_string),
		hits: parse_hits(response)?,
	})
}
