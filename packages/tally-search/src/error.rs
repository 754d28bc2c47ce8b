use serde_json::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error("Search engine responded with status {status}: {body}")]
	Status { status: u16, body: String },
	#[error("Search engine rejected the request with status {status}: {}", reasons.join("; "))]
	RootCause { status: u16, reasons: Vec<String> },
	#[error("Aggregation {name} is missing from the search response.")]
	MissingAggregation { name: String },
	#[error("Invalid search response: {message}")]
	InvalidResponse { message: String },
	#[error("Invalid query: {message}")]
	InvalidQuery { message: String },
}
impl Error {
	/// Root-cause reasons reported by the engine, when the failure carried them.
	pub fn root_causes(&self) -> Option<&[String]> {
		match self {
			Self::RootCause { reasons, .. } => Some(reasons),
			_ => None,
		}
	}

	pub(crate) fn from_status(status: u16, body: String) -> Self {
		match serde_json::from_str::<Value>(&body).ok().and_then(|json| root_cause_reasons(&json)) {
			Some(reasons) => Self::RootCause { status, reasons },
			None => Self::Status { status, body },
		}
	}
}

/// Extracts `error.root_cause[*]` entries as `"<type>: <reason>"` strings.
pub fn root_cause_reasons(body: &Value) -> Option<Vec<String>> {
	let causes = body.get("error")?.get("root_cause")?.as_array()?;
	let reasons = causes
		.iter()
		.filter_map(|cause| {
			let reason = cause.get("reason").and_then(Value::as_str)?;

			Some(match cause.get("type").and_then(Value::as_str) {
				Some(kind) => format!("{kind}: {reason}"),
				None => reason.to_string(),
			})
		})
		.collect::<Vec<_>>();

	if reasons.is_empty() { None } else { Some(reasons) }
}
