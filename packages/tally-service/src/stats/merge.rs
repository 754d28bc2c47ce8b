use std::{
	cmp::Ordering,
	collections::{BTreeMap, BTreeSet, HashMap},
};

use serde::Serialize;
use time::UtcOffset;

use crate::stats::{DerivedMetric, MetricTable, StatValue};
use tally_search::dsl;

/// Metric name to value for one bucket key.
pub type StatsRow = BTreeMap<String, StatValue>;

/// Fan-out output before pivoting: metric name to that metric's per-bucket values.
pub type RawMetricTable = HashMap<String, MetricTable>;

pub const TOTAL_KEY: &str = "Total";

/// The unified table: one row per bucket key plus a synthesized total.
///
/// Every row, the total included, carries every raw and derived metric name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergedStats {
	pub metrics: Vec<String>,
	pub rows: HashMap<String, StatsRow>,
	pub total: StatsRow,
	#[serde(skip)]
	raw_metrics: Vec<String>,
	#[serde(skip)]
	ratio_metrics: BTreeSet<String>,
	#[serde(skip)]
	derived: Vec<DerivedMetric>,
}
impl MergedStats {
	/// Pivots metric-major `raw` into bucket-major rows.
	///
	/// `scaffold` lists bucket keys that must exist even if no handler reported them. Metrics that
	/// produced ratio strings are never summed; their total is `"N/A"`.
	pub fn pivot(raw: &RawMetricTable, raw_metrics: &[String], scaffold: &[String]) -> Self {
		let mut rows: HashMap<String, StatsRow> =
			scaffold.iter().map(|key| (key.clone(), StatsRow::new())).collect();
		let mut ratio_metrics = BTreeSet::new();

		for metric in raw_metrics {
			let Some(table) = raw.get(metric) else {
				continue;
			};

			for (key, value) in table {
				if value.is_ratio() {
					ratio_metrics.insert(metric.clone());
				}

				rows.entry(key.clone()).or_default().insert(metric.clone(), value.clone());
			}
		}

		let mut merged = Self {
			metrics: raw_metrics.to_vec(),
			rows,
			total: StatsRow::new(),
			raw_metrics: raw_metrics.to_vec(),
			ratio_metrics,
			derived: Vec::new(),
		};

		for row in merged.rows.values_mut() {
			fill_missing(row, &merged.raw_metrics, &merged.ratio_metrics);
		}

		merged.recompute_total();

		merged
	}

	/// Computes `derived` for every row and for the total. Re-running it yields the same table.
	pub fn apply_derived(&mut self, derived: &[DerivedMetric]) {
		for metric in derived {
			if !self.metrics.contains(&metric.name) {
				self.metrics.push(metric.name.clone());
			}
			if !self.derived.contains(metric) {
				self.derived.push(metric.clone());
			}
		}

		for row in self.rows.values_mut().chain(std::iter::once(&mut self.total)) {
			for metric in &self.derived {
				metric.apply(row);
			}
		}
	}

	/// Keeps exactly `keys` as rows: known rows are kept, absent ones are zero-filled and any
	/// other row is dropped. The total and derived metrics are recomputed afterwards.
	pub fn reconcile_keys<I>(&mut self, keys: I)
	where
		I: IntoIterator<Item = String>,
	{
		let mut rows = HashMap::new();

		for key in keys {
			let row = match self.rows.remove(&key) {
				Some(row) => row,
				None => {
					let mut row = StatsRow::new();

					fill_missing(&mut row, &self.raw_metrics, &self.ratio_metrics);

					row
				},
			};

			rows.insert(key, row);
		}

		self.rows = rows;

		self.recompute_total();

		let derived = std::mem::take(&mut self.derived);

		self.apply_derived(&derived);
	}

	/// Rows in chronological order of their bucket keys.
	///
	/// Keys are read as RFC 3339 or `yyyy-MM-dd HH:mm:ss` (in `offset`); unparsable keys follow
	/// in lexical order.
	pub fn sorted_rows(&self, offset: UtcOffset) -> Vec<(&str, &StatsRow)> {
		let mut rows = self
			.rows
			.iter()
			.map(|(key, row)| (dsl::bucket_epoch(key, offset), key.as_str(), row))
			.collect::<Vec<_>>();

		rows.sort_by(|(a_epoch, a_key, _), (b_epoch, b_key, _)| match (a_epoch, b_epoch) {
			(Some(a), Some(b)) => a.cmp(b).then_with(|| a_key.cmp(b_key)),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => a_key.cmp(b_key),
		});

		rows.into_iter().map(|(_, key, row)| (key, row)).collect()
	}

	pub fn row(&self, key: &str) -> Option<&StatsRow> {
		if key == TOTAL_KEY { Some(&self.total) } else { self.rows.get(key) }
	}

	fn recompute_total(&mut self) {
		let mut total = StatsRow::new();

		for metric in &self.raw_metrics {
			let value = if self.ratio_metrics.contains(metric) {
				StatValue::not_available()
			} else {
				StatValue::Count(
					self.rows
						.values()
						.filter_map(|row| row.get(metric).and_then(StatValue::as_count))
						.sum(),
				)
			};

			total.insert(metric.clone(), value);
		}

		self.total = total;
	}
}

fn fill_missing(row: &mut StatsRow, raw_metrics: &[String], ratio_metrics: &BTreeSet<String>) {
	for metric in raw_metrics {
		if !row.contains_key(metric) {
			let value = if ratio_metrics.contains(metric) {
				StatValue::not_available()
			} else {
				StatValue::Count(0)
			};

			row.insert(metric.clone(), value);
		}
	}
}
