use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	models::{ExportStatus, ExportTask},
};

/// Persistence for export tasks; the single source of truth for "is an export running".
pub trait TaskStore
where
	Self: Send + Sync,
{
	/// Inserts a RUNNING task for `tenant_id`, failing with [`Error::Conflict`] while another is
	/// running.
	fn try_create_running<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Uuid>>;

	fn set_completed<'a>(&'a self, task_id: Uuid, file_path: &'a str) -> BoxFuture<'a, Result<()>>;

	fn set_failed<'a>(&'a self, task_id: Uuid, message: &'a str) -> BoxFuture<'a, Result<()>>;

	fn set_empty(&self, task_id: Uuid) -> BoxFuture<'_, Result<()>>;

	fn get(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>>;

	fn status(&self, task_id: Uuid) -> BoxFuture<'_, Result<ExportStatus>> {
		Box::pin(async move {
			match self.get(task_id).await? {
				Some(task) => task.status(),
				None => Err(Error::NotFound(format!("Export task {task_id} does not exist."))),
			}
		})
	}

	fn exists(&self, task_id: Uuid) -> BoxFuture<'_, Result<bool>> {
		Box::pin(async move { Ok(self.get(task_id).await?.is_some()) })
	}

	/// Removes the row and returns it so the caller can remove its artifact.
	fn delete_task(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>>;

	/// Deletes finished tasks created before `cutoff`. RUNNING tasks are kept.
	fn delete_all_before(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>>;

	/// Moves every RUNNING task to FAILED; used at boot to release admission after a crash.
	fn fail_running_tasks<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<u64>>;
}

#[derive(Clone, Debug)]
pub struct PgTaskStore {
	pool: PgPool,
}
impl PgTaskStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn finish(
		&self,
		task_id: Uuid,
		status: ExportStatus,
		file_path: Option<&str>,
		error_message: Option<&str>,
	) -> Result<()> {
		let result = sqlx::query(
			"\
UPDATE export_tasks
SET status = $2, file_path = $3, error_message = $4, updated_at = $5
WHERE task_id = $1 AND status = 'RUNNING'",
		)
		.bind(task_id)
		.bind(status.as_str())
		.bind(file_path)
		.bind(error_message)
		.bind(OffsetDateTime::now_utc())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound(format!("No running export task {task_id}.")));
		}

		Ok(())
	}
}

impl TaskStore for PgTaskStore {
	fn try_create_running<'a>(&'a self, tenant_id: &'a str) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			if tenant_id.trim().is_empty() {
				return Err(Error::InvalidArgument("tenant_id must be non-empty.".to_string()));
			}

			let task_id = Uuid::new_v4();
			let now = OffsetDateTime::now_utc();

			sqlx::query(
				"\
INSERT INTO export_tasks (task_id, tenant_id, status, created_at, updated_at)
VALUES ($1, $2, 'RUNNING', $3, $3)",
			)
			.bind(task_id)
			.bind(tenant_id)
			.bind(now)
			.execute(&self.pool)
			.await
			.map_err(|err| {
				Error::from_insert(err, || {
					format!("Tenant {tenant_id} already has a running export.")
				})
			})?;

			Ok(task_id)
		})
	}

	fn set_completed<'a>(&'a self, task_id: Uuid, file_path: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.finish(task_id, ExportStatus::Completed, Some(file_path), None))
	}

	fn set_failed<'a>(&'a self, task_id: Uuid, message: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.finish(task_id, ExportStatus::Failed, None, Some(message)))
	}

	fn set_empty(&self, task_id: Uuid) -> BoxFuture<'_, Result<()>> {
		Box::pin(self.finish(task_id, ExportStatus::Empty, None, None))
	}

	fn get(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>> {
		Box::pin(async move {
			let task = sqlx::query_as::<_, ExportTask>(
				"\
SELECT task_id, tenant_id, status, file_path, error_message, created_at, updated_at
FROM export_tasks
WHERE task_id = $1",
			)
			.bind(task_id)
			.fetch_optional(&self.pool)
			.await?;

			Ok(task)
		})
	}

	fn delete_task(&self, task_id: Uuid) -> BoxFuture<'_, Result<Option<ExportTask>>> {
		Box::pin(async move {
			let task = sqlx::query_as::<_, ExportTask>(
				"\
DELETE FROM export_tasks
WHERE task_id = $1
RETURNING task_id, tenant_id, status, file_path, error_message, created_at, updated_at",
			)
			.bind(task_id)
			.fetch_optional(&self.pool)
			.await?;

			Ok(task)
		})
	}

	fn delete_all_before(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move {
			let result = sqlx::query(
				"DELETE FROM export_tasks WHERE created_at < $1 AND status <> 'RUNNING'",
			)
				.bind(cutoff)
				.execute(&self.pool)
				.await?;

			Ok(result.rows_affected())
		})
	}

	fn fail_running_tasks<'a>(&'a self, message: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let result = sqlx::query(
				"\
UPDATE export_tasks
SET status = 'FAILED', error_message = $1, updated_at = $2
WHERE status = 'RUNNING'",
			)
			.bind(message)
			.bind(OffsetDateTime::now_utc())
			.execute(&self.pool)
			.await?;

			Ok(result.rows_affected())
		})
	}
}
