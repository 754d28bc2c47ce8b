use std::{collections::HashSet, sync::Arc};

use tokio::sync::mpsc;

use crate::{
	Error, Query, Result,
	stats::{DerivedMetric, MergedStats, MetricHandler, RawMetricTable},
};
use tally_search::SearchEngine;

/// Named metric handlers plus the ratios derived from their outputs.
#[derive(Clone, Default)]
pub struct MetricBundle {
	handlers: Vec<(String, Arc<dyn MetricHandler>)>,
	derived: Vec<DerivedMetric>,
}
impl MetricBundle {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn metric<H>(self, name: &str, handler: H) -> Self
	where
		H: MetricHandler + 'static,
	{
		self.shared_metric(name, Arc::new(handler))
	}

	pub fn shared_metric(mut self, name: &str, handler: Arc<dyn MetricHandler>) -> Self {
		self.handlers.push((name.to_string(), handler));

		self
	}

	pub fn derived(mut self, metric: DerivedMetric) -> Self {
		self.derived.push(metric);

		self
	}

	pub fn metric_names(&self) -> Vec<String> {
		self.handlers.iter().map(|(name, _)| name.clone()).collect()
	}

	pub fn derived_metrics(&self) -> &[DerivedMetric] {
		&self.derived
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}

	fn validate(&self) -> Result<()> {
		if self.handlers.is_empty() {
			return Err(Error::InvalidRequest {
				message: "A metric bundle needs at least one handler.".to_string(),
			});
		}

		let mut seen = HashSet::new();
		let names = self
			.handlers
			.iter()
			.map(|(name, _)| name)
			.chain(self.derived.iter().map(|metric| &metric.name));

		for name in names {
			if !seen.insert(name.as_str()) {
				return Err(Error::InvalidRequest {
					message: format!("Metric {name} is declared more than once."),
				});
			}
		}

		Ok(())
	}
}

/// Runs every handler of `bundle` concurrently and merges their outputs.
///
/// All handlers run to completion even after one fails; the first failure observed becomes the
/// bundle's error and no partial table is returned. There is no timeout at this layer.
pub async fn fetch_bundle(
	engine: Arc<dyn SearchEngine>,
	query: Arc<Query>,
	bundle: &MetricBundle,
) -> Result<MergedStats> {
	bundle.validate()?;

	let (tx, mut rx) = mpsc::channel(bundle.len());

	for (name, handler) in &bundle.handlers {
		let tx = tx.clone();
		let name = name.clone();
		let handler = Arc::clone(handler);
		let engine = Arc::clone(&engine);
		let query = Arc::clone(&query);

		tokio::spawn(async move {
			let result = handler.fetch(engine.as_ref(), query.as_ref()).await;

			// The receiver only goes away when the caller stopped waiting.
			let _ = tx.send((name, result)).await;
		});
	}

	drop(tx);

	let mut raw = RawMetricTable::with_capacity(bundle.len());
	let mut reported = HashSet::with_capacity(bundle.len());
	let mut first_error = None;

	// Completes once every task has reported or died, so no handler is left behind.
	while let Some((name, result)) = rx.recv().await {
		reported.insert(name.clone());

		match result {
			Ok(table) => {
				raw.insert(name, table);
			},
			Err(err) => {
				tracing::warn!(metric = %name, error = %err, "Metric handler failed.");

				if first_error.is_none() {
					first_error = Some(err);
				}
			},
		}
	}

	if let Some(err) = first_error {
		return Err(err);
	}
	if let Some(name) = bundle.metric_names().into_iter().find(|name| !reported.contains(name)) {
		return Err(Error::MetricTask {
			metric: name,
			message: "The task ended without reporting a result.".to_string(),
		});
	}

	let mut merged = MergedStats::pivot(&raw, &bundle.metric_names(), &query.scaffold_keys()?);

	merged.apply_derived(&bundle.derived);

	tracing::debug!(
		tenant_id = %query.tenant_id,
		metrics = bundle.len(),
		buckets = merged.rows.len(),
		"Metric bundle merged."
	);

	Ok(merged)
}
