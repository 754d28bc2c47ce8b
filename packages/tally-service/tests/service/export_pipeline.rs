use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use time::{OffsetDateTime, UtcOffset, macros::date};

use tally_search::dsl::{Interval, TimeWindow};
use tally_service::{
	AggregationMode, Download, Error, ExportOutcome, Exporter, Query,
	export::{
		ExportTaskOption, SheetWriter,
		download::{XLSX_CONTENT_TYPE, ZIP_CONTENT_TYPE},
		records,
	},
};
use tally_storage::{ExportStatus, MemoryTaskStore, TaskStore};

use super::{CountingWriter, FakeEngine};

struct Harness {
	dir: tempfile::TempDir,
	engine: Arc<FakeEngine>,
	store: Arc<MemoryTaskStore>,
	writer: Arc<CountingWriter>,
	exporter: Exporter,
}
impl Harness {
	fn new(engine: FakeEngine, page_size: u32, max_rows_per_file: u32) -> Self {
		let dir = tempfile::tempdir().expect("tempdir");
		let mut cfg = super::test_config(dir.path());

		cfg.export.page_size = page_size;
		cfg.export.max_rows_per_file = max_rows_per_file;

		let engine = Arc::new(engine);
		let store = Arc::new(MemoryTaskStore::new());
		let exporter =
			Exporter::from_config(&cfg, engine.clone(), store.clone()).expect("exporter");

		Self { dir, engine, store, writer: Arc::new(CountingWriter::default()), exporter }
	}

	fn option(&self, writer: Arc<dyn SheetWriter>) -> ExportTaskOption {
		let cfg = super::test_config(self.dir.path());

		records::records_export_option(&cfg, &query(), writer).expect("option")
	}

	fn counting_option(&self) -> ExportTaskOption {
		self.option(self.writer.clone())
	}
}

fn query() -> Query {
	let window = TimeWindow::days(
		date!(2024 - 01 - 01),
		date!(2024 - 01 - 31),
		UtcOffset::UTC,
		Interval::Day,
	)
	.expect("window");

	Query::new("t1", window, AggregationMode::ByTime).expect("query")
}

fn files_in(dir: &Path, extension: &str) -> usize {
	walk(dir)
		.into_iter()
		.filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
		.count()
}

fn walk(dir: &Path) -> Vec<PathBuf> {
	let mut out = Vec::new();

	for entry in std::fs::read_dir(dir).expect("read dir") {
		let path = entry.expect("entry").path();

		if path.is_dir() {
			out.extend(walk(&path));
		} else {
			out.push(path);
		}
	}

	out
}

#[tokio::test]
async fn large_exports_are_split_then_archived() {
	let harness = Harness::new(FakeEngine::new().scrolling(250_000), 10_000, 100_000);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let outcome =
		harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await;
	let (path, rows, files) = match outcome {
		ExportOutcome::Completed { path, rows, files } => (path, rows, files),
		other => panic!("Expected a completed export, got {other:?}."),
	};

	assert_eq!(rows, 250_000);
	assert_eq!(files, 3);
	assert_eq!(harness.writer.batches(), vec![100_000, 100_000, 50_000]);
	assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("zip"));
	assert!(path.exists());
	assert_eq!(files_in(harness.dir.path(), "xlsx"), 0);
	assert_eq!(harness.engine.cleared(), 1);

	let task = harness.store.get(task_id).await.expect("get").expect("task");

	assert_eq!(task.status().expect("status"), ExportStatus::Completed);
	assert_eq!(task.file_path.as_deref().map(Path::new), Some(path.as_path()));

	let Download::Ready(artifact) = harness.exporter.download(task_id).await.expect("download")
	else {
		panic!("Expected an artifact.");
	};

	assert_eq!(artifact.content_type, ZIP_CONTENT_TYPE);
	assert!(artifact.file_name.ends_with(".zip"));
	assert!(artifact.open().await.is_ok());
}

#[tokio::test]
async fn file_count_is_the_ceiling_of_rows_over_threshold() {
	for (docs, expected) in [(1, 1), (99, 1), (100, 1), (101, 2), (350, 4)] {
		let harness = Harness::new(FakeEngine::new().scrolling(docs), 30, 100);
		let task_id = harness.store.try_create_running("t1").await.expect("admission");
		let outcome =
			harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await;

		assert_eq!(harness.writer.batches().len(), expected, "{docs} documents");
		assert!(matches!(outcome, ExportOutcome::Completed { files, .. } if files == expected));
	}
}

#[tokio::test]
async fn single_file_exports_are_not_archived() {
	let harness = Harness::new(FakeEngine::new().scrolling(5), 1_000, 100_000);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");

	harness.exporter.run_export(task_id, harness.counting_option(), "t1", "zh-cn").await;

	let Download::Ready(artifact) = harness.exporter.download(task_id).await.expect("download")
	else {
		panic!("Expected an artifact.");
	};
	let today = OffsetDateTime::now_utc().date();
	let day_dir = format!("{:04}{:02}{:02}", today.year(), u8::from(today.month()), today.day());

	assert_eq!(artifact.content_type, XLSX_CONTENT_TYPE);
	assert!(artifact.path.starts_with(harness.dir.path().join(day_dir).join("t1")));
	assert_eq!(files_in(harness.dir.path(), "zip"), 0);
}

#[tokio::test]
async fn empty_exports_produce_no_file() {
	let harness = Harness::new(FakeEngine::new(), 1_000, 100_000);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let outcome =
		harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await;

	assert_eq!(outcome, ExportOutcome::Empty);
	assert_eq!(harness.exporter.status(task_id).await.expect("status"), ExportStatus::Empty);
	assert_eq!(harness.exporter.download(task_id).await.expect("download"), Download::Empty);
	assert!(harness.writer.batches().is_empty());
}

#[tokio::test]
async fn engine_failures_are_persisted_with_root_causes() {
	let harness = Harness::new(FakeEngine::new().scrolling(50).failing_on_page(2), 10, 100);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let outcome =
		harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await;
	let expected = "search_context_missing_exception: No search context found; too_many_buckets";

	assert_eq!(outcome, ExportOutcome::Failed { message: expected.to_string() });
	assert_eq!(harness.engine.cleared(), 1);
	assert_eq!(harness.exporter.status(task_id).await.expect("status"), ExportStatus::Failed);

	match harness.exporter.download(task_id).await {
		Err(Error::ExportFailed { message }) => assert_eq!(message, expected),
		other => panic!("Expected the stored failure, got {other:?}."),
	}
}

#[tokio::test]
async fn admission_is_exclusive_per_tenant() {
	let harness = Harness::new(FakeEngine::new().scrolling(3), 1_000, 100_000);
	let blocking = harness.store.try_create_running("t1").await.expect("admission");
	let err = harness
		.exporter
		.start_export(harness.counting_option(), "t1", "en-us")
		.await
		.expect_err("second export");

	assert!(matches!(err, Error::ExportInProgress { ref tenant_id } if tenant_id == "t1"));

	harness.exporter.start_export(harness.counting_option(), "t2", "en-us").await.expect("t2");
	harness.store.set_empty(blocking).await.expect("terminal");

	let task_id =
		harness.exporter.start_export(harness.counting_option(), "t1", "en-us").await.expect("t1");
	let mut status = ExportStatus::Running;

	for _ in 0..200 {
		status = harness.exporter.status(task_id).await.expect("status");

		if status.is_terminal() {
			break;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	assert_eq!(status, ExportStatus::Completed);
}

#[tokio::test]
async fn running_tasks_cannot_be_downloaded() {
	let harness = Harness::new(FakeEngine::new(), 1_000, 100_000);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");

	assert!(matches!(
		harness.exporter.download(task_id).await,
		Err(Error::ExportStillRunning { .. })
	));
}

#[tokio::test]
async fn delete_removes_row_and_artifact() {
	let harness = Harness::new(FakeEngine::new().scrolling(5), 1_000, 100_000);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let ExportOutcome::Completed { path, .. } =
		harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await
	else {
		panic!("Expected a completed export.");
	};

	harness.exporter.delete(task_id).await.expect("delete");

	assert!(!path.exists());
	assert!(matches!(harness.exporter.download(task_id).await, Err(Error::NotFound { .. })));
	assert!(matches!(harness.exporter.delete(task_id).await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn records_export_writes_real_workbooks() {
	let harness = Harness::new(FakeEngine::new().scrolling(3), 1_000, 100_000);
	let writer = Arc::new(records::records_sheet_writer("zh-cn"));
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let ExportOutcome::Completed { path, rows, .. } =
		harness.exporter.run_export(task_id, harness.option(writer), "t1", "en-us").await
	else {
		panic!("Expected a completed export.");
	};
	let bytes = std::fs::read(&path).expect("workbook");

	assert_eq!(rows, 3);
	assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn back_to_back_exports_keep_their_own_artifacts() {
	let harness = Harness::new(FakeEngine::new().scrolling(5), 1_000, 100_000);
	let cfg = super::test_config(harness.dir.path());
	let smaller = Exporter::from_config(
		&cfg,
		Arc::new(FakeEngine::new().scrolling(3)),
		harness.store.clone(),
	)
	.expect("exporter");
	let first = harness.store.try_create_running("t1").await.expect("admission");
	let ExportOutcome::Completed { path: first_path, .. } =
		harness.exporter.run_export(first, harness.counting_option(), "t1", "en-us").await
	else {
		panic!("Expected a completed export.");
	};
	let second = harness.store.try_create_running("t1").await.expect("admission");
	let ExportOutcome::Completed { path: second_path, .. } =
		smaller.run_export(second, harness.counting_option(), "t1", "en-us").await
	else {
		panic!("Expected a completed export.");
	};

	assert_ne!(first_path, second_path);
	assert_eq!(std::fs::read_to_string(&first_path).expect("first"), "5 rows for t1");
	assert_eq!(std::fs::read_to_string(&second_path).expect("second"), "3 rows for t1");

	harness.exporter.delete(second).await.expect("delete");

	let Download::Ready(artifact) = harness.exporter.download(first).await.expect("download")
	else {
		panic!("Expected the first artifact to survive.");
	};

	assert_eq!(artifact.path, first_path);
}

#[tokio::test]
async fn failed_runs_remove_the_sheets_they_wrote() {
	let harness = Harness::new(FakeEngine::new().scrolling(50).failing_on_page(2), 10, 10);
	let task_id = harness.store.try_create_running("t1").await.expect("admission");
	let outcome =
		harness.exporter.run_export(task_id, harness.counting_option(), "t1", "en-us").await;

	assert!(matches!(outcome, ExportOutcome::Failed { .. }));
	assert_eq!(harness.writer.batches(), vec![10]);
	assert_eq!(files_in(harness.dir.path(), "xlsx"), 0);
}
