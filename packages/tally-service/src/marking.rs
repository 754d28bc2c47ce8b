//! Marking visit records as similar questions of a standard question, and unmarking them.
//!
//! The similar-question store and the record index are updated in two separate steps. When the
//! second step fails after the first succeeded, the two disagree and [`MarkError::rollback_needed`]
//! says so; nothing here undoes the first step.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;
use serde_json::{Value, json};

use crate::{BoxFuture, Error, Result};
use tally_search::{Hit, SearchEngine, dsl};

const USER_QUESTION_FIELD: &str = "user_q";

/// Item result the store reports for an alias it does not have.
pub const NOT_EXIST: &str = "NOT_EXIST";

/// A failed call to the similar-question store.
///
/// Batch operations report one result per submitted item in `results`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimilarQuestionError {
	pub message: String,
	pub results: Vec<String>,
}
impl SimilarQuestionError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into(), results: Vec::new() }
	}

	pub fn with_results(message: impl Into<String>, results: Vec<String>) -> Self {
		Self { message: message.into(), results }
	}

	/// True when every item failed only because it was not there.
	pub fn is_not_exist_only(&self) -> bool {
		!self.results.is_empty() && self.results.iter().all(|result| result == NOT_EXIST)
	}
}
impl fmt::Display for SimilarQuestionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.results.is_empty() {
			write!(f, "{}", self.message)
		} else {
			write!(f, "{} ({})", self.message, self.results.join(", "))
		}
	}
}
impl std::error::Error for SimilarQuestionError {}

impl From<SimilarQuestionError> for Error {
	fn from(err: SimilarQuestionError) -> Self {
		Self::SimilarQuestion { message: err.to_string() }
	}
}

pub type StoreResult<T> = std::result::Result<T, SimilarQuestionError>;

/// The external store of standard questions and their similar-question aliases, per tenant.
pub trait SimilarQuestionStore
where
	Self: Send + Sync,
{
	fn is_standard_question<'a>(
		&'a self,
		tenant_id: &'a str,
		question: &'a str,
	) -> BoxFuture<'a, StoreResult<bool>>;

	fn delete_aliases<'a>(
		&'a self,
		tenant_id: &'a str,
		aliases: &'a [String],
	) -> BoxFuture<'a, StoreResult<()>>;

	fn set_alias<'a>(
		&'a self,
		tenant_id: &'a str,
		standard_question: &'a str,
		aliases: &'a [String],
	) -> BoxFuture<'a, StoreResult<()>>;

	fn is_similar_question<'a>(
		&'a self,
		tenant_id: &'a str,
		question: &'a str,
	) -> BoxFuture<'a, StoreResult<bool>>;

	fn get_standard_question_for_alias<'a>(
		&'a self,
		tenant_id: &'a str,
		alias: &'a str,
	) -> BoxFuture<'a, StoreResult<String>>;
}

/// Partial updates applied to records by script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordUpdate {
	Mark { marked: bool, intent: Option<String> },
	Ignore { ignored: bool },
}
impl RecordUpdate {
	pub fn script(&self) -> Value {
		match self {
			Self::Mark { marked, intent } => json!({
				"lang": "painless",
				"source": "ctx._source.isMarked = params.marked; ctx._source.marked_intent = params.intent",
				"params": { "marked": marked, "intent": intent },
			}),
			Self::Ignore { ignored } => json!({
				"lang": "painless",
				"source": "ctx._source.isIgnored = params.ignored",
				"params": { "ignored": ignored },
			}),
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
	pub done: Vec<String>,
	pub skipped: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct MarkError {
	#[source]
	pub source: Error,
	/// The question store and the records may now disagree. Advisory only.
	pub rollback_needed: bool,
}
impl MarkError {
	fn clean(source: impl Into<Error>) -> Self {
		Self { source: source.into(), rollback_needed: false }
	}

	fn dirty(source: impl Into<Error>) -> Self {
		Self { source: source.into(), rollback_needed: true }
	}
}

struct CandidateRecord {
	id: String,
	user_q: String,
}

pub struct Reconciler {
	engine: Arc<dyn SearchEngine>,
	questions: Arc<dyn SimilarQuestionStore>,
	records_index: String,
}
impl Reconciler {
	pub fn new(
		engine: Arc<dyn SearchEngine>,
		questions: Arc<dyn SimilarQuestionStore>,
		records_index: impl Into<String>,
	) -> Self {
		Self { engine, questions, records_index: records_index.into() }
	}

	pub fn from_config(
		cfg: &tally_config::Search,
		engine: Arc<dyn SearchEngine>,
		questions: Arc<dyn SimilarQuestionStore>,
	) -> Self {
		Self::new(engine, questions, cfg.records_index.clone())
	}

	/// Marks (or unmarks) the user questions of `record_ids` as aliases of `content`.
	///
	/// Records whose question is itself a different standard question are skipped.
	pub async fn reconcile_mark(
		&self,
		tenant_id: &str,
		record_ids: &[String],
		content: &str,
		mark: bool,
	) -> std::result::Result<ReconcileOutcome, MarkError> {
		let records = self.fetch_records(tenant_id, record_ids).await.map_err(MarkError::clean)?;
		let mut todo = Vec::with_capacity(records.len());
		let mut skipped = Vec::new();

		for record in records {
			let standard = self
				.questions
				.is_standard_question(tenant_id, &record.user_q)
				.await
				.map_err(MarkError::clean)?;

			if standard && record.user_q != content {
				skipped.push(record.id);
			} else {
				todo.push(record);
			}
		}

		let aliases = unique_questions(&todo);

		if aliases.is_empty() {
			tracing::debug!(tenant_id, skipped = skipped.len(), "No records left to reconcile.");

			return Ok(ReconcileOutcome { done: Vec::new(), skipped });
		}

		if mark {
			// A stale alias surfaces as a failure of the following set.
			if let Err(err) = self.questions.delete_aliases(tenant_id, &aliases).await {
				tracing::debug!(tenant_id, error = %err, "Ignored failure to clear prior aliases.");
			}

			self.questions
				.set_alias(tenant_id, content, &aliases)
				.await
				.map_err(MarkError::dirty)?;
		} else {
			match self.questions.delete_aliases(tenant_id, &aliases).await {
				Ok(()) => {},
				Err(err) if err.is_not_exist_only() => {
					tracing::debug!(tenant_id, "Aliases were already gone.");
				},
				Err(err) => return Err(MarkError::dirty(err)),
			}
		}

		let done = todo.into_iter().map(|record| record.id).collect::<Vec<_>>();
		let update = RecordUpdate::Mark { marked: mark, intent: mark.then(|| content.to_string()) };

		self.update_records(tenant_id, &done, &update).await.map_err(MarkError::dirty)?;

		tracing::info!(
			tenant_id,
			mark,
			done = done.len(),
			skipped = skipped.len(),
			"Record marks reconciled."
		);

		Ok(ReconcileOutcome { done, skipped })
	}

	pub async fn ignore_records(
		&self,
		tenant_id: &str,
		record_ids: &[String],
		ignored: bool,
	) -> Result<u64> {
		self.update_records(tenant_id, record_ids, &RecordUpdate::Ignore { ignored }).await
	}

	/// The standard question a marked record's user question is an alias of, if any.
	pub async fn marked_content(&self, tenant_id: &str, record_id: &str) -> Result<Option<String>> {
		let ids = [record_id.to_string()];
		let mut records = self.fetch_records(tenant_id, &ids).await?;

		if records.len() > 1 {
			return Err(Error::InvalidRequest {
				message: format!("Record id {record_id} is ambiguous ({} results).", records.len()),
			});
		}

		let Some(record) = records.pop() else {
			return Err(Error::NotFound { message: format!("Record {record_id} does not exist.") });
		};

		if !self.questions.is_similar_question(tenant_id, &record.user_q).await? {
			return Ok(None);
		}

		Ok(Some(self.questions.get_standard_question_for_alias(tenant_id, &record.user_q).await?))
	}

	fn index(&self, tenant_id: &str) -> String {
		format!("{}-{}-*", self.records_index, tenant_id)
	}

	async fn fetch_records(
		&self,
		tenant_id: &str,
		record_ids: &[String],
	) -> Result<Vec<CandidateRecord>> {
		validate_target(tenant_id)?;

		if record_ids.is_empty() {
			return Ok(Vec::new());
		}

		let query =
			dsl::BoolFilter::for_tenant(tenant_id).filter(dsl::ids(record_ids)).into_query();
		let body = json!({
			"size": record_ids.len(),
			"query": query,
			"_source": [USER_QUESTION_FIELD],
		});
		let response = self.engine.search(&self.index(tenant_id), &body).await?;

		Ok(tally_search::parse_hits(&response)?.iter().map(candidate).collect())
	}

	async fn update_records(
		&self,
		tenant_id: &str,
		record_ids: &[String],
		update: &RecordUpdate,
	) -> Result<u64> {
		validate_target(tenant_id)?;

		if record_ids.is_empty() {
			return Ok(0);
		}

		let query =
			dsl::BoolFilter::for_tenant(tenant_id).filter(dsl::ids(record_ids)).into_query();
		let report =
			self.engine.update_by_query(&self.index(tenant_id), &query, &update.script()).await?;

		if report.version_conflicts > 0 {
			tracing::warn!(
				tenant_id,
				conflicts = report.version_conflicts,
				"Skipped records changed during update."
			);
		}

		Ok(report.updated)
	}
}

fn validate_target(tenant_id: &str) -> Result<()> {
	if tenant_id.trim().is_empty() {
		return Err(Error::InvalidRequest { message: "Tenant id must not be empty.".to_string() });
	}

	Ok(())
}

fn candidate(hit: &Hit) -> CandidateRecord {
	let user_q = hit
		.source
		.get(USER_QUESTION_FIELD)
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();

	CandidateRecord { id: hit.id.clone(), user_q }
}

/// Distinct questions in first-seen order; the store rejects duplicates in one batch.
fn unique_questions(records: &[CandidateRecord]) -> Vec<String> {
	let mut seen = HashSet::new();

	records
		.iter()
		.filter(|record| seen.insert(record.user_q.as_str()))
		.map(|record| record.user_q.clone())
		.collect()
}
