//! Daily reclamation of expired export output.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration as StdDuration,
};

use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tokio::{fs, time as tokio_time};

use crate::{Result, export::pipeline::DAY_DIR_FORMAT};
use tally_storage::TaskStore;

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub removed_dirs: Vec<PathBuf>,
	pub removed_tasks: u64,
	pub failures: usize,
}

/// Midnight of `today` in `offset`.
pub fn day_start(today: Date, offset: UtcOffset) -> OffsetDateTime {
	PrimitiveDateTime::new(today, Time::MIDNIGHT).assume_offset(offset)
}

/// Removes day directories and task rows strictly older than `today`.
///
/// Failures are logged and counted; the sweep always visits everything.
pub async fn sweep_once(
	store: &dyn TaskStore,
	base_dir: &Path,
	today: Date,
	offset: UtcOffset,
) -> SweepReport {
	let mut report = SweepReport::default();

	tracing::info!(%today, base_dir = %base_dir.display(), "Housekeeping sweep started.");

	match expired_dirs(base_dir, today).await {
		Ok(dirs) =>
			for dir in dirs {
				match fs::remove_dir_all(&dir).await {
					Ok(()) => report.removed_dirs.push(dir),
					Err(err) => {
						tracing::error!(
							path = %dir.display(),
							error = %err,
							"Failed to remove export directory."
						);

						report.failures += 1;
					},
				}
			},
		Err(err) => {
			tracing::error!(
				base_dir = %base_dir.display(),
				error = %err,
				"Failed to list export directories."
			);

			report.failures += 1;
		},
	}

	match store.delete_all_before(day_start(today, offset)).await {
		Ok(count) => report.removed_tasks = count,
		Err(err) => {
			tracing::error!(error = %err, "Failed to delete expired export tasks.");

			report.failures += 1;
		},
	}

	tracing::info!(
		removed_dirs = report.removed_dirs.len(),
		removed_tasks = report.removed_tasks,
		failures = report.failures,
		"Housekeeping sweep finished."
	);

	report
}

/// Sweeps once per day, forever.
pub async fn run(store: Arc<dyn TaskStore>, base_dir: PathBuf, offset: UtcOffset) -> Result<()> {
	loop {
		let today = OffsetDateTime::now_utc().to_offset(offset).date();

		sweep_once(store.as_ref(), &base_dir, today, offset).await;

		tokio_time::sleep(SWEEP_INTERVAL).await;
	}
}

async fn expired_dirs(base_dir: &Path, today: Date) -> Result<Vec<PathBuf>> {
	if !fs::try_exists(base_dir).await? {
		return Ok(Vec::new());
	}

	let mut entries = fs::read_dir(base_dir).await?;
	let mut expired = Vec::new();

	while let Some(entry) = entries.next_entry().await? {
		if !entry.file_type().await?.is_dir() {
			continue;
		}

		let name = entry.file_name();
		// Anything that is not a day directory is left alone.
		let Some(day) = name.to_str().and_then(|name| Date::parse(name, DAY_DIR_FORMAT).ok()) else {
			continue;
		};

		if day < today {
			expired.push(entry.path());
		}
	}

	expired.sort();

	Ok(expired)
}
