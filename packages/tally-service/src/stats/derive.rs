use serde::Serialize;

use crate::stats::{StatValue, StatsRow};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
	/// `numerator / denominator`.
	Ratio,
	/// `(denominator - numerator) / denominator`, e.g. a success rate from a failure count.
	ComplementRatio,
}

/// A ratio computed from two counted metrics of the same row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DerivedMetric {
	pub name: String,
	pub numerator: String,
	pub denominator: String,
	pub kind: DerivedKind,
}
impl DerivedMetric {
	pub fn ratio(name: &str, numerator: &str, denominator: &str) -> Self {
		Self {
			name: name.to_string(),
			numerator: numerator.to_string(),
			denominator: denominator.to_string(),
			kind: DerivedKind::Ratio,
		}
	}

	pub fn complement_ratio(name: &str, numerator: &str, denominator: &str) -> Self {
		Self { kind: DerivedKind::ComplementRatio, ..Self::ratio(name, numerator, denominator) }
	}

	/// Missing or non-count inputs read as zero.
	pub fn compute(&self, row: &StatsRow) -> StatValue {
		let count = |metric: &str| row.get(metric).and_then(StatValue::as_count).unwrap_or(0);

		format_ratio(count(&self.numerator), count(&self.denominator), self.kind)
	}

	pub fn apply(&self, row: &mut StatsRow) {
		let value = self.compute(row);

		row.insert(self.name.clone(), value);
	}
}

pub fn format_ratio(numerator: i64, denominator: i64, kind: DerivedKind) -> StatValue {
	if denominator == 0 {
		return StatValue::not_available();
	}

	let numerator = match kind {
		DerivedKind::Ratio => numerator,
		DerivedKind::ComplementRatio => denominator - numerator,
	};

	StatValue::Ratio(format!("{:.2}", numerator as f64 / denominator as f64))
}
