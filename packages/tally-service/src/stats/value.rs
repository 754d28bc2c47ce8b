use serde::{Deserialize, Serialize};

/// Placeholder for a ratio whose denominator is zero.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
	Count(i64),
	Ratio(String),
}
impl StatValue {
	pub fn not_available() -> Self {
		Self::Ratio(NOT_AVAILABLE.to_string())
	}

	pub fn as_count(&self) -> Option<i64> {
		match self {
			Self::Count(count) => Some(*count),
			Self::Ratio(_) => None,
		}
	}

	pub fn is_ratio(&self) -> bool {
		matches!(self, Self::Ratio(_))
	}
}
impl From<i64> for StatValue {
	fn from(count: i64) -> Self {
		Self::Count(count)
	}
}
