pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Search error: {0}")]
	Search(tally_search::Error),
	#[error("Aggregation {name} is missing from the search response.")]
	MissingAggregation { name: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("An export is already in progress for tenant {tenant_id}.")]
	ExportInProgress { tenant_id: String },
	#[error("Export task {task_id} is still running.")]
	ExportStillRunning { task_id: String },
	#[error("Export failed: {message}")]
	ExportFailed { message: String },
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("Sheet error: {message}")]
	Sheet { message: String },
	#[error("Archive error: {message}")]
	Archive { message: String },
	#[error("Similar question store error: {message}")]
	SimilarQuestion { message: String },
	#[error("Metric task {metric} did not finish: {message}")]
	MetricTask { metric: String, message: String },
}
impl Error {
	/// Message suitable for persisting or showing to an operator.
	///
	/// Structured engine failures are reduced to their root-cause reasons.
	pub fn user_message(&self) -> String {
		match self {
			Self::Search(err) => match err.root_causes() {
				Some(reasons) => reasons.join("; "),
				None => err.to_string(),
			},
			other => other.to_string(),
		}
	}
}

impl From<tally_search::Error> for Error {
	fn from(err: tally_search::Error) -> Self {
		match err {
			tally_search::Error::MissingAggregation { name } => Self::MissingAggregation { name },
			tally_search::Error::InvalidQuery { message } => Self::InvalidRequest { message },
			other => Self::Search(other),
		}
	}
}

impl From<tally_storage::Error> for Error {
	fn from(err: tally_storage::Error) -> Self {
		match err {
			tally_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			tally_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			tally_storage::Error::NotFound(message) => Self::NotFound { message },
			tally_storage::Error::Conflict(message) => Self::Storage { message },
		}
	}
}

impl From<rust_xlsxwriter::XlsxError> for Error {
	fn from(err: rust_xlsxwriter::XlsxError) -> Self {
		Self::Sheet { message: err.to_string() }
	}
}

impl From<zip::result::ZipError> for Error {
	fn from(err: zip::result::ZipError) -> Self {
		Self::Archive { message: err.to_string() }
	}
}
