//! In-process [`TaskStore`] for tests and single-node tooling.
//!
//! The whole table sits behind one mutex, so the RUNNING-per-tenant check and the insert happen
//! atomically just like the partial unique index guarantees in Postgres.

use std::{collections::HashMap, sync::Mutex};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result, TaskStore,
	models::{ExportStatus, ExportTask},
};

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
	tasks: Mutex<HashMap<Uuid, ExportTask>>,
}
impl MemoryTaskStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a task as-is; lets tests seed rows with arbitrary timestamps.
	pub fn insert(&self, task: ExportTask) {
		self.lock().insert(task.task_id, task);
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ExportTask>> {
		self.tasks.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn finish(
		&self,
		task_id: Uuid,
		status: ExportStatus,
		file_path: Option<&str>,
		error_message: Option<&str>,
	) -> Result<()> {
		let mut tasks = self.lock();
		let task = tasks
			.get_mut(&task_id)
			.filter(|task| task.status == ExportStatus::Running.as_str())
			.ok_or_else(|| Error::NotFound(format!("No running export task {task_id}.")))?;

		task.status = status.as_str().to_string();
		task.file_path = file_path.map(str::to_string);
		task.error_message = error_message.map(str::to_string);
		task.updated_at = OffsetDateTime::now_utc();

		Ok(())
	}
}

impl TaskStore for MemoryTaskStore {
	fn try_create_running<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			if tenant_id.trim().is_empty() {
				return Err(Error::InvalidArgument("tenant_id must be non-empty.".to_string()));
			}

			let mut tasks = self.lock();

			if tasks.values().any(|task| {
				task.tenant_id == tenant_id && task.status == ExportStatus::Running.as_str()
			}) {
				return Err(Error::Conflict(format!(
					"Tenant {tenant_id} already has a running export."
				)));
			}

			let now = OffsetDateTime::now_utc();
			let task_id = Uuid::new_v4();

			tasks.insert(
				task_id,
				ExportTask {
					task_id,
					tenant_id: tenant_id.to_string(),
					status: ExportStatus::Running.as_str().to_string(),
					file_path: None,
					error_message: None,
					created_at: now,
					updated_at: now,
				},
			);

			Ok(task_id)
		})
	}

	fn set_completed<'a>(&'a self, task_id: Uuid, file_path: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(
			async move { self.finish(task_id, ExportStatus::Completed, Some(file_path), None) },
		)
	}

	fn set_failed<'a>(&'a self, task_id: Uuid, message: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { self.finish(task_id, ExportStatus::Failed, None, Some(message)) })
	}

	fn set_empty(&self, task_id: Uuid) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { self.finish(task_id, ExportStatus::Empty, None, None) })
	}

	fn get(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>> {
		Box::pin(async move { Ok(self.lock().get(&task_id).cloned()) })
	}

	fn delete_task(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>> {
		Box::pin(async move { Ok(self.lock().remove(&task_id)) })
	}

	fn delete_all_before(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move {
			let mut tasks = self.lock();
			let before = tasks.len();

			tasks.retain(|_, task| {
				task.created_at >= cutoff || task.status == ExportStatus::Running.as_str()
			});

			Ok((before - tasks.len()) as u64)
		})
	}

	fn fail_running_tasks<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let mut failed = 0;

			for task in self.lock().values_mut() {
				if task.status == ExportStatus::Running.as_str() {
					task.status = ExportStatus::Failed.as_str().to_string();
					task.error_message = Some(message.to_string());
					task.updated_at = now;
					failed += 1;
				}
			}

			Ok(failed)
		})
	}
}
