use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStatus {
	Running,
	Completed,
	Failed,
	Empty,
}
impl ExportStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Running => "RUNNING",
			Self::Completed => "COMPLETED",
			Self::Failed => "FAILED",
			Self::Empty => "EMPTY",
		}
	}

	pub fn is_terminal(self) -> bool {
		!matches!(self, Self::Running)
	}
}
impl fmt::Display for ExportStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for ExportStatus {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"RUNNING" => Ok(Self::Running),
			"COMPLETED" => Ok(Self::Completed),
			"FAILED" => Ok(Self::Failed),
			"EMPTY" => Ok(Self::Empty),
			other => Err(Error::InvalidArgument(format!("Unknown export status {other:?}."))),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct ExportTask {
	pub task_id: Uuid,
	pub tenant_id: String,
	pub status: String,
	pub file_path: Option<String>,
	pub error_message: Option<String>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl ExportTask {
	pub fn status(&self) -> crate::Result<ExportStatus> {
		self.status.parse()
	}
}

/// One row of the tag tables joined with its type code.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct TagRow {
	pub app_id: String,
	pub tag_type: String,
	pub code: String,
	pub name: String,
}
