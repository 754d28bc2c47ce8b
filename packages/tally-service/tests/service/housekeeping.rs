use std::{fs, sync::Arc, time::Duration};

use time::{
	OffsetDateTime,
	macros::{date, datetime, offset},
};
use uuid::Uuid;

use tally_service::{TagCatalog, TallyService, housekeeping::sweep_once};
use tally_storage::{ExportStatus, ExportTask, MemoryTaskStore, TaskStore};

use super::FakeEngine;

fn task(tenant_id: &str, created_at: OffsetDateTime) -> ExportTask {
	ExportTask {
		task_id: Uuid::new_v4(),
		tenant_id: tenant_id.to_string(),
		status: ExportStatus::Completed.as_str().to_string(),
		file_path: None,
		error_message: None,
		created_at,
		updated_at: created_at,
	}
}

#[tokio::test]
async fn only_prior_days_are_reclaimed() {
	let dir = tempfile::tempdir().expect("tempdir");
	let base = dir.path();

	for day in ["20231231", "20240101", "20240102"] {
		fs::create_dir_all(base.join(day).join("t1")).expect("day dir");
		fs::write(base.join(day).join("t1").join("out.xlsx"), b"rows").expect("artifact");
	}

	fs::create_dir_all(base.join("notes")).expect("foreign dir");
	fs::write(base.join("20230101"), b"not a directory").expect("foreign file");

	let store = MemoryTaskStore::new();
	let old = task("t1", datetime!(2024-01-01 23:59:59 UTC));
	let fresh = task("t1", datetime!(2024-01-02 00:00:00 UTC));
	let (old_id, fresh_id) = (old.task_id, fresh.task_id);

	store.insert(old);
	store.insert(fresh);

	let report = sweep_once(&store, base, date!(2024 - 01 - 02), offset!(UTC)).await;

	assert_eq!(report.removed_dirs, vec![base.join("20231231"), base.join("20240101")]);
	assert_eq!(report.removed_tasks, 1);
	assert_eq!(report.failures, 0);
	assert!(base.join("20240102").join("t1").join("out.xlsx").exists());
	assert!(base.join("notes").exists());
	assert!(base.join("20230101").exists());
	assert!(!store.exists(old_id).await.expect("exists"));
	assert!(store.exists(fresh_id).await.expect("exists"));

	let again = sweep_once(&store, base, date!(2024 - 01 - 02), offset!(UTC)).await;

	assert!(again.removed_dirs.is_empty());
	assert_eq!(again.removed_tasks, 0);
	assert_eq!(again.failures, 0);
}

#[tokio::test]
async fn day_boundary_follows_the_configured_offset() {
	let dir = tempfile::tempdir().expect("tempdir");
	let store = MemoryTaskStore::new();
	// 2024-01-02 01:00 at +08:00.
	let same_local_day = task("t1", datetime!(2024-01-01 17:00 UTC));
	// 2024-01-01 23:00 at +08:00.
	let previous_local_day = task("t1", datetime!(2024-01-01 15:00 UTC));
	let kept = same_local_day.task_id;

	store.insert(same_local_day);
	store.insert(previous_local_day);

	let report = sweep_once(&store, dir.path(), date!(2024 - 01 - 02), offset!(+8)).await;

	assert_eq!(report.removed_tasks, 1);
	assert!(store.exists(kept).await.expect("exists"));
}

#[tokio::test]
async fn missing_base_dir_is_not_a_failure() {
	let dir = tempfile::tempdir().expect("tempdir");
	let store = MemoryTaskStore::new();
	let report =
		sweep_once(&store, &dir.path().join("never-created"), date!(2024 - 01 - 02), offset!(UTC))
			.await;

	assert_eq!(report.failures, 0);
	assert!(report.removed_dirs.is_empty());
}

#[tokio::test]
async fn starting_the_service_releases_interrupted_exports_and_sweeps() {
	let dir = tempfile::tempdir().expect("tempdir");
	let expired = dir.path().join("20000101").join("t1");

	fs::create_dir_all(&expired).expect("expired dir");

	let store = Arc::new(MemoryTaskStore::new());
	let interrupted = store.try_create_running("t1").await.expect("admission");
	let service = TallyService::new(
		super::test_config(dir.path()),
		Arc::new(FakeEngine::new()),
		store.clone(),
		Arc::new(TagCatalog::from_rows(Vec::new())),
	)
	.expect("service");
	let housekeeping = service.start().await.expect("start");
	let task = store.get(interrupted).await.expect("get").expect("task");

	assert_eq!(task.status().expect("status"), ExportStatus::Failed);
	assert_eq!(task.error_message.as_deref(), Some("Interrupted by restart."));

	store.try_create_running("t1").await.expect("admission released");

	for _ in 0..200 {
		if !dir.path().join("20000101").exists() {
			break;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	assert!(!dir.path().join("20000101").exists());
	assert!(!housekeeping.is_finished());

	housekeeping.abort();
}
