//! Readers for aggregation responses.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{Error, Result};

/// Doc counts per bucket of a terms or date histogram aggregation named `agg_name`.
///
/// Keys prefer `key_as_string` so date buckets come back in the requested format.
pub fn bucket_counts(response: &Value, agg_name: &str) -> Result<BTreeMap<String, i64>> {
	let mut counts = BTreeMap::new();

	for bucket in buckets(response, agg_name)? {
		let key = bucket_key(bucket)?;
		let count = bucket.get("doc_count").and_then(Value::as_i64).unwrap_or_default();

		counts.insert(key, count);
	}

	Ok(counts)
}

/// Values of the single-value sub aggregation `sub_name` (e.g. a cardinality) per bucket.
pub fn bucket_sub_values(
	response: &Value,
	agg_name: &str,
	sub_name: &str,
) -> Result<BTreeMap<String, i64>> {
	let mut values = BTreeMap::new();

	for bucket in buckets(response, agg_name)? {
		let key = bucket_key(bucket)?;
		let value = bucket
			.get(sub_name)
			.and_then(|sub| sub.get("value"))
			.and_then(Value::as_f64)
			.map(|value| value.round() as i64)
			.unwrap_or_default();

		values.insert(key, value);
	}

	Ok(values)
}

fn aggregation<'a>(response: &'a Value, agg_name: &str) -> Result<&'a Value> {
	response
		.get("aggregations")
		.and_then(|aggs| aggs.get(agg_name))
		.ok_or_else(|| Error::MissingAggregation { name: agg_name.to_string() })
}

fn buckets<'a>(response: &'a Value, agg_name: &str) -> Result<&'a [Value]> {
	aggregation(response, agg_name)?
		.get("buckets")
		.and_then(Value::as_array)
		.map(Vec::as_slice)
		.ok_or_else(|| Error::InvalidResponse {
			message: format!("Aggregation {agg_name} has no buckets array."),
		})
}

fn bucket_key(bucket: &Value) -> Result<String> {
	if let Some(key) = bucket.get("key_as_string").and_then(Value::as_str) {
		return Ok(key.to_string());
	}

	match bucket.get("key") {
		Some(Value::String(key)) => Ok(key.clone()),
		Some(Value::Number(key)) => Ok(key.to_string()),
		Some(Value::Bool(key)) => Ok(key.to_string()),
		_ => Err(Error::InvalidResponse { message: "Bucket is missing its key.".to_string() }),
	}
}
