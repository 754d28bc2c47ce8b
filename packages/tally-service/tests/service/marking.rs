use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex},
};

use serde_json::{Value, json};

use tally_service::{
	BoxFuture, Error, ReconcileOutcome, Reconciler, SimilarQuestionError, SimilarQuestionStore,
	marking::{NOT_EXIST, StoreResult},
};

use super::FakeEngine;

const CONTENT: &str = "Reset password";

#[derive(Default)]
struct FakeQuestions {
	standard: HashSet<String>,
	aliases: HashMap<String, String>,
	calls: Mutex<Vec<String>>,
	classify_error: Option<SimilarQuestionError>,
	delete_error: Option<SimilarQuestionError>,
	set_error: Option<SimilarQuestionError>,
}
impl FakeQuestions {
	fn new() -> Self {
		Self {
			standard: [CONTENT, "Billing"].into_iter().map(str::to_string).collect(),
			..Self::default()
		}
	}

	fn calls(&self) -> Vec<String> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	fn record(&self, call: String) {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).push(call);
	}
}
impl SimilarQuestionStore for FakeQuestions {
	fn is_standard_question<'a>(
		&'a self,
		_tenant_id: &'a str,
		question: &'a str,
	) -> BoxFuture<'a, StoreResult<bool>> {
		Box::pin(async move {
			match &self.classify_error {
				Some(err) => Err(err.clone()),
				None => Ok(self.standard.contains(question)),
			}
		})
	}

	fn delete_aliases<'a>(
		&'a self,
		tenant_id: &'a str,
		aliases: &'a [String],
	) -> BoxFuture<'a, StoreResult<()>> {
		Box::pin(async move {
			self.record(format!("delete {tenant_id} [{}]", aliases.join(", ")));

			match &self.delete_error {
				Some(err) => Err(err.clone()),
				None => Ok(()),
			}
		})
	}

	fn set_alias<'a>(
		&'a self,
		tenant_id: &'a str,
		standard_question: &'a str,
		aliases: &'a [String],
	) -> BoxFuture<'a, StoreResult<()>> {
		Box::pin(async move {
			self.record(format!("set {tenant_id} {standard_question} [{}]", aliases.join(", ")));

			match &self.set_error {
				Some(err) => Err(err.clone()),
				None => Ok(()),
			}
		})
	}

	fn is_similar_question<'a>(
		&'a self,
		_tenant_id: &'a str,
		question: &'a str,
	) -> BoxFuture<'a, StoreResult<bool>> {
		Box::pin(async move { Ok(self.aliases.contains_key(question)) })
	}

	fn get_standard_question_for_alias<'a>(
		&'a self,
		_tenant_id: &'a str,
		alias: &'a str,
	) -> BoxFuture<'a, StoreResult<String>> {
		Box::pin(async move {
			self.aliases
				.get(alias)
				.cloned()
				.ok_or_else(|| SimilarQuestionError::new(format!("{alias} is not an alias.")))
		})
	}
}

/// Answers id lookups from a fixed set of records, in the requested order.
fn records_engine() -> FakeEngine {
	let records = HashMap::from([
		("r1", "reset pwd"),
		("r2", "reset pwd"),
		("r3", CONTENT),
		("r4", "Billing"),
		("dup", "twice"),
	]);

	FakeEngine::with_search(move |index, body| {
		assert_eq!(index, "records-t1-*");
		assert_eq!(body["_source"], json!(["user_q"]));

		let ids = body["query"]["bool"]["filter"]
			.as_array()
			.and_then(|clauses| {
				clauses.iter().find_map(|clause| clause["ids"]["values"].as_array())
			})
			.cloned()
			.unwrap_or_default();
		let hit = |id: &str, index: &str, user_q: &str| {
			json!({ "_id": id, "_index": index, "_source": { "user_q": user_q } })
		};
		let mut hits = Vec::new();

		for id in ids.iter().filter_map(Value::as_str) {
			if let Some(user_q) = records.get(id) {
				hits.push(hit(id, "records-t1-2024", user_q));

				// A second index holding the same id.
				if id == "dup" {
					hits.push(hit(id, "records-t1-2023", user_q));
				}
			}
		}

		Ok(json!({ "hits": { "hits": hits } }))
	})
}

fn ids(ids: &[&str]) -> Vec<String> {
	ids.iter().map(|id| id.to_string()).collect()
}

fn reconciler(engine: Arc<FakeEngine>, questions: Arc<FakeQuestions>) -> Reconciler {
	let cfg = super::test_config(std::path::Path::new("/tmp"));

	Reconciler::from_config(&cfg.search, engine, questions)
}

fn updates(engine: &FakeEngine) -> Vec<(String, Value, Value)> {
	engine.updates.lock().unwrap_or_else(|err| err.into_inner()).clone()
}

#[tokio::test]
async fn marking_skips_other_standard_questions() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions::new());
	let outcome = reconciler(engine.clone(), questions.clone())
		.reconcile_mark("t1", &ids(&["r1", "r2", "r3", "r4"]), CONTENT, true)
		.await
		.expect("mark");

	assert_eq!(outcome.done, ids(&["r1", "r2", "r3"]));
	assert_eq!(outcome.skipped, ids(&["r4"]));
	assert_eq!(
		questions.calls(),
		vec![
			"delete t1 [reset pwd, Reset password]".to_string(),
			"set t1 Reset password [reset pwd, Reset password]".to_string(),
		]
	);

	let updates = updates(&engine);

	assert_eq!(updates.len(), 1);

	let (index, query, script) = &updates[0];

	assert_eq!(index, "records-t1-*");
	assert_eq!(query["bool"]["filter"][1]["ids"]["values"], json!(["r1", "r2", "r3"]));
	assert_eq!(script["params"], json!({ "marked": true, "intent": CONTENT }));
}

#[tokio::test]
async fn prior_alias_cleanup_failure_does_not_block_marking() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		delete_error: Some(SimilarQuestionError::new("connection reset")),
		..FakeQuestions::new()
	});
	let outcome = reconciler(engine.clone(), questions)
		.reconcile_mark("t1", &ids(&["r1"]), CONTENT, true)
		.await
		.expect("mark");

	assert_eq!(outcome.done, ids(&["r1"]));
	assert_eq!(updates(&engine).len(), 1);
}

#[tokio::test]
async fn unmarking_tolerates_aliases_already_gone() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		delete_error: Some(SimilarQuestionError::with_results(
			"delete failed",
			vec![NOT_EXIST.to_string()],
		)),
		..FakeQuestions::new()
	});
	let outcome = reconciler(engine.clone(), questions.clone())
		.reconcile_mark("t1", &ids(&["r1", "r2"]), CONTENT, false)
		.await
		.expect("unmark");

	assert_eq!(outcome.done, ids(&["r1", "r2"]));
	assert_eq!(questions.calls(), vec!["delete t1 [reset pwd]".to_string()]);
	assert_eq!(updates(&engine)[0].2["params"], json!({ "marked": false, "intent": null }));
}

#[tokio::test]
async fn unmark_failures_leave_records_untouched() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		delete_error: Some(SimilarQuestionError::with_results(
			"delete failed",
			vec![NOT_EXIST.to_string(), "LOCKED".to_string()],
		)),
		..FakeQuestions::new()
	});
	let err = reconciler(engine.clone(), questions)
		.reconcile_mark("t1", &ids(&["r1", "r2"]), CONTENT, false)
		.await
		.expect_err("unmark");

	assert!(err.rollback_needed);
	assert!(matches!(err.source, Error::SimilarQuestion { .. }));
	assert!(updates(&engine).is_empty());
}

#[tokio::test]
async fn failed_alias_set_needs_rollback() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		set_error: Some(SimilarQuestionError::new("quota exceeded")),
		..FakeQuestions::new()
	});
	let err = reconciler(engine.clone(), questions)
		.reconcile_mark("t1", &ids(&["r1"]), CONTENT, true)
		.await
		.expect_err("mark");

	assert!(err.rollback_needed);
	assert!(updates(&engine).is_empty());
}

#[tokio::test]
async fn classification_failures_change_nothing() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		classify_error: Some(SimilarQuestionError::new("timeout")),
		..FakeQuestions::new()
	});
	let err = reconciler(engine.clone(), questions.clone())
		.reconcile_mark("t1", &ids(&["r1"]), CONTENT, true)
		.await
		.expect_err("mark");

	assert!(!err.rollback_needed);
	assert!(questions.calls().is_empty());
	assert!(updates(&engine).is_empty());
}

#[tokio::test]
async fn nothing_left_to_mark_leaves_the_store_alone() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		delete_error: Some(SimilarQuestionError::new("empty batch")),
		set_error: Some(SimilarQuestionError::new("empty batch")),
		..FakeQuestions::new()
	});
	let reconciler = reconciler(engine.clone(), questions.clone());
	let outcome =
		reconciler.reconcile_mark("t1", &ids(&["r4"]), CONTENT, true).await.expect("mark");

	assert_eq!(outcome.done, Vec::<String>::new());
	assert_eq!(outcome.skipped, ids(&["r4"]));

	let outcome =
		reconciler.reconcile_mark("t1", &ids(&["missing"]), CONTENT, false).await.expect("unmark");

	assert_eq!(outcome, ReconcileOutcome::default());
	assert!(questions.calls().is_empty());
	assert!(updates(&engine).is_empty());
}

#[tokio::test]
async fn empty_tenant_is_rejected() {
	let engine = Arc::new(records_engine());
	let err = reconciler(engine, Arc::new(FakeQuestions::new()))
		.reconcile_mark(" ", &ids(&["r1"]), CONTENT, true)
		.await
		.expect_err("mark");

	assert!(!err.rollback_needed);
	assert!(matches!(err.source, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn ignore_flags_only_the_given_records() {
	let engine = Arc::new(records_engine());
	let reconciler = reconciler(engine.clone(), Arc::new(FakeQuestions::new()));
	let updated = reconciler.ignore_records("t1", &ids(&["r1", "r4"]), true).await.expect("ignore");

	assert_eq!(updated, 2);
	assert_eq!(reconciler.ignore_records("t1", &[], true).await.expect("ignore"), 0);

	let updates = updates(&engine);

	assert_eq!(updates.len(), 1);
	assert_eq!(updates[0].2["params"], json!({ "ignored": true }));
}

#[tokio::test]
async fn marked_content_resolves_the_standard_question() {
	let engine = Arc::new(records_engine());
	let questions = Arc::new(FakeQuestions {
		aliases: HashMap::from([("reset pwd".to_string(), CONTENT.to_string())]),
		..FakeQuestions::new()
	});
	let reconciler = reconciler(engine, questions);

	assert_eq!(
		reconciler.marked_content("t1", "r1").await.expect("content"),
		Some(CONTENT.to_string())
	);
	assert_eq!(reconciler.marked_content("t1", "r4").await.expect("content"), None);
	assert!(matches!(
		reconciler.marked_content("t1", "dup").await,
		Err(Error::InvalidRequest { .. })
	));
	assert!(matches!(
		reconciler.marked_content("t1", "missing").await,
		Err(Error::NotFound { .. })
	));
}
