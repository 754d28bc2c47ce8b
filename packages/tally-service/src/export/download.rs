use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use tokio::fs;
use uuid::Uuid;

use crate::{Error, Result, export::Exporter};
use tally_storage::ExportStatus;

pub const ZIP_CONTENT_TYPE: &str = "application/zip";
pub const XLSX_CONTENT_TYPE: &str =
	"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// What a finished export hands back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Download {
	/// The export matched nothing; there is no file.
	Empty,
	Ready(ExportArtifact),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportArtifact {
	pub path: PathBuf,
	pub file_name: String,
	pub content_type: &'static str,
}
impl ExportArtifact {
	pub fn from_path(path: PathBuf) -> Result<Self> {
		let file_name = path
			.file_name()
			.and_then(|name| name.to_str())
			.ok_or_else(|| Error::NotFound {
				message: format!("Export artifact {} has no file name.", path.display()),
			})?
			.to_string();
		let content_type = content_type_for(&path)?;

		Ok(Self { path, file_name, content_type })
	}

	pub async fn open(&self) -> Result<fs::File> {
		Ok(fs::File::open(&self.path).await?)
	}
}

pub fn content_type_for(path: &Path) -> Result<&'static str> {
	match path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
		Some("zip") => Ok(ZIP_CONTENT_TYPE),
		Some("xlsx") => Ok(XLSX_CONTENT_TYPE),
		_ => Err(Error::InvalidRequest {
			message: format!("Unsupported export artifact {}.", path.display()),
		}),
	}
}

impl Exporter {
	pub async fn status(&self, task_id: Uuid) -> Result<ExportStatus> {
		Ok(self.store.status(task_id).await?)
	}

	pub async fn download(&self, task_id: Uuid) -> Result<Download> {
		let task = self.store.get(task_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Export task {task_id} does not exist."),
		})?;

		match task.status()? {
			ExportStatus::Running =>
				Err(Error::ExportStillRunning { task_id: task_id.to_string() }),
			ExportStatus::Failed =>
				Err(Error::ExportFailed { message: task.error_message.unwrap_or_default() }),
			ExportStatus::Empty => Ok(Download::Empty),
			ExportStatus::Completed => {
				let path = task.file_path.map(PathBuf::from).ok_or_else(|| Error::NotFound {
					message: format!("Export task {task_id} has no artifact."),
				})?;

				if !fs::try_exists(&path).await? {
					return Err(Error::NotFound {
						message: format!("Export artifact for task {task_id} is gone."),
					});
				}

				Ok(Download::Ready(ExportArtifact::from_path(path)?))
			},
		}
	}

	/// Removes the task and its artifact. A run still in flight is not stopped.
	pub async fn delete(&self, task_id: Uuid) -> Result<()> {
		let task = self.store.delete_task(task_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Export task {task_id} does not exist."),
		})?;

		if let Some(path) = task.file_path {
			match fs::remove_file(&path).await {
				Ok(()) => {},
				Err(err) if err.kind() == ErrorKind::NotFound => {},
				Err(err) => return Err(err.into()),
			}
		}

		tracing::info!(%task_id, tenant_id = %task.tenant_id, "Export task deleted.");

		Ok(())
	}
}
