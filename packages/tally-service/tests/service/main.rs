mod export_pipeline;
mod housekeeping;
mod marking;

use std::{
	path::{Path, PathBuf},
	sync::{
		Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use serde_json::{Value, json};

use tally_search::{BoxFuture, Hit, ScrollPage, SearchEngine, UpdateReport};
use tally_service::export::{SheetRequest, SheetWriter};

type SearchFn = Box<dyn Fn(&str, &Value) -> tally_search::Result<Value> + Send + Sync>;

pub fn test_config(base_dir: &Path) -> tally_config::Config {
	tally_config::Config {
		service: tally_config::Service { log_level: "info".to_string() },
		storage: tally_config::Storage {
			postgres: tally_config::Postgres {
				dsn: "postgres://127.0.0.1:1/tally".to_string(),
				pool_max_conns: 1,
			},
		},
		search: tally_config::Search {
			url: "http://127.0.0.1:1".to_string(),
			username: None,
			password: None,
			timeout_ms: 1_000,
			records_index: "records".to_string(),
			sessions_index: "sessions".to_string(),
			term_agg_size: 100,
		},
		stats: tally_config::Stats { timezone: "+00:00".to_string() },
		export: tally_config::Export {
			base_dir: base_dir.to_path_buf(),
			page_size: 1_000,
			max_rows_per_file: 100_000,
			scroll_keep_alive: "1m".to_string(),
			default_locale: "en-us".to_string(),
		},
	}
}

pub fn record_source(i: usize) -> Value {
	json!({
		"user_id": format!("u{i}"),
		"user_q": format!("question {i}"),
		"score": 50.0,
		"log_time": "2024-01-01T00:00:00Z",
		"module": "faq",
	})
}

#[derive(Default)]
struct ScrollState {
	next: usize,
	page_size: usize,
	pages: usize,
}

/// In-memory engine: searches answer through a closure, scrolls walk `scroll_docs` synthetic
/// records and updates are recorded.
pub struct FakeEngine {
	search: SearchFn,
	scroll_docs: usize,
	fail_on_page: Option<usize>,
	state: Mutex<ScrollState>,
	pub updates: Mutex<Vec<(String, Value, Value)>>,
	pub cleared: AtomicUsize,
}
impl FakeEngine {
	pub fn new() -> Self {
		Self::with_search(|_, _| Ok(json!({ "hits": { "hits": [] } })))
	}

	pub fn with_search<F>(search: F) -> Self
	where
		F: Fn(&str, &Value) -> tally_search::Result<Value> + Send + Sync + 'static,
	{
		Self {
			search: Box::new(search),
			scroll_docs: 0,
			fail_on_page: None,
			state: Mutex::new(ScrollState::default()),
			updates: Mutex::new(Vec::new()),
			cleared: AtomicUsize::new(0),
		}
	}

	pub fn scrolling(mut self, docs: usize) -> Self {
		self.scroll_docs = docs;

		self
	}

	/// The scroll fails with a structured root-cause error when asked for page `page` (1-based).
	pub fn failing_on_page(mut self, page: usize) -> Self {
		self.fail_on_page = Some(page);

		self
	}

	pub fn cleared(&self) -> usize {
		self.cleared.load(Ordering::SeqCst)
	}

	fn page(&self) -> tally_search::Result<ScrollPage> {
		let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

		state.pages += 1;

		if self.fail_on_page == Some(state.pages) {
			return Err(tally_search::Error::RootCause {
				status: 500,
				reasons: vec![
					"search_context_missing_exception: No search context found".to_string(),
					"too_many_buckets".to_string(),
				],
			});
		}

		let start = state.next;
		let end = (start + state.page_size).min(self.scroll_docs);
		let hits = (start..end)
			.map(|i| Hit {
				id: format!("r{i}"),
				index: "records-t1-2024".to_string(),
				source: record_source(i),
			})
			.collect();

		state.next = end;

		Ok(ScrollPage { scroll_id: Some("scroll-1".to_string()), hits })
	}
}
impl SearchEngine for FakeEngine {
	fn search<'a>(
		&'a self,
		index: &'a str,
		body: &'a Value,
	) -> BoxFuture<'a, tally_search::Result<Value>> {
		let result = (self.search)(index, body);

		Box::pin(async move { result })
	}

	fn open_scroll<'a>(
		&'a self,
		_index: &'a str,
		body: &'a Value,
		_keep_alive: &'a str,
	) -> BoxFuture<'a, tally_search::Result<ScrollPage>> {
		{
			let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

			state.next = 0;
			state.pages = 0;
			state.page_size = body["size"].as_u64().unwrap_or(10) as usize;
		}

		let page = self.page();

		Box::pin(async move { page })
	}

	fn next_scroll<'a>(
		&'a self,
		_scroll_id: &'a str,
		_keep_alive: &'a str,
	) -> BoxFuture<'a, tally_search::Result<ScrollPage>> {
		let page = self.page();

		Box::pin(async move { page })
	}

	fn clear_scroll<'a>(&'a self, _scroll_id: &'a str) -> BoxFuture<'a, tally_search::Result<()>> {
		self.cleared.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Ok(()) })
	}

	fn update_by_query<'a>(
		&'a self,
		index: &'a str,
		query: &'a Value,
		script: &'a Value,
	) -> BoxFuture<'a, tally_search::Result<UpdateReport>> {
		let updated = query["bool"]["filter"]
			.as_array()
			.and_then(|clauses| {
				clauses.iter().find_map(|clause| clause["ids"]["values"].as_array())
			})
			.map(|ids| ids.len() as u64)
			.unwrap_or_default();

		self.updates.lock().unwrap_or_else(|err| err.into_inner()).push((
			index.to_string(),
			query.clone(),
			script.clone(),
		));

		Box::pin(async move { Ok(UpdateReport { updated, version_conflicts: 0 }) })
	}
}

/// Writes one small text file per batch and remembers every batch size.
#[derive(Default)]
pub struct CountingWriter {
	pub batches: Mutex<Vec<usize>>,
}
impl CountingWriter {
	pub fn batches(&self) -> Vec<usize> {
		self.batches.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl SheetWriter for CountingWriter {
	fn write(&self, request: &SheetRequest<'_>) -> tally_service::Result<PathBuf> {
		let path = request.dir.join(format!("{}.xlsx", request.file_stem));

		std::fs::write(&path, format!("{} rows for {}", request.rows.len(), request.tenant_id))?;

		self.batches.lock().unwrap_or_else(|err| err.into_inner()).push(request.rows.len());

		Ok(path)
	}
}
