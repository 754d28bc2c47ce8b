//! The registered statistics surfaces.

use crate::stats::{
	CardinalityHandler, DerivedMetric, DocCountHandler, MetricBundle, PresentFieldHandler,
	handler::MetricSource,
};
use tally_search::dsl;

pub const CALL_TIME_FIELD: &str = "end_time";
pub const RECORD_TIME_FIELD: &str = "log_time";
pub const SESSION_START_FIELD: &str = "start_time";
pub const SESSION_END_FIELD: &str = "end_time";

const CALL_STATUS_COMPLETE: i64 = 1;
const CALL_STATUS_TO_HUMAN: i64 = -1;
const CALL_STATUS_TIMEOUT: i64 = -2;
const CALL_STATUS_CANCEL: i64 = -3;
const CALL_STATUS_UNKNOWN: i64 = -10;

const WELCOME_TAG: &str = "welcome_tag";

/// Calls bucketed by session end time.
pub fn call_stats(cfg: &tally_config::Search) -> MetricBundle {
	let source = || MetricSource::new(&cfg.sessions_index, CALL_TIME_FIELD, cfg.term_agg_size);
	let status = |code: i64| DocCountHandler::new(source().filter(dsl::term("status", code)));

	MetricBundle::new()
		.metric("totals", DocCountHandler::new(source()))
		.metric("completes", status(CALL_STATUS_COMPLETE))
		.metric("to_humans", status(CALL_STATUS_TO_HUMAN))
		.metric("timeouts", status(CALL_STATUS_TIMEOUT))
		.metric("cancels", status(CALL_STATUS_CANCEL))
		.metric("unknowns", status(CALL_STATUS_UNKNOWN))
		.derived(DerivedMetric::ratio("completes_rate", "completes", "totals"))
		.derived(DerivedMetric::ratio("to_humans_rate", "to_humans", "totals"))
		.derived(DerivedMetric::ratio("timeouts_rate", "timeouts", "totals"))
		.derived(DerivedMetric::ratio("cancels_rate", "cancels", "totals"))
}

/// Conversations, users and answer categories over visit records.
pub fn visit_stats(cfg: &tally_config::Search) -> MetricBundle {
	let records = || {
		MetricSource::new(&cfg.records_index, RECORD_TIME_FIELD, cfg.term_agg_size)
			.must_not(dsl::term("user_q.keyword", WELCOME_TAG))
	};
	let modules = |names: &[&str]| {
		dsl::terms("module", &names.iter().map(|name| name.to_string()).collect::<Vec<_>>())
	};
	let conversations =
		MetricSource::new(&cfg.sessions_index, SESSION_END_FIELD, cfg.term_agg_size);

	MetricBundle::new()
		.metric("conversations", CardinalityHandler::new(conversations, "session_id"))
		.metric("unique_users", CardinalityHandler::new(records(), "user_id"))
		.metric("total_asks", DocCountHandler::new(records()))
		.metric(
			"normal_responses",
			DocCountHandler::new(records().filter(modules(&["faq", "task_engine"]))),
		)
		.metric("chats", DocCountHandler::new(records().filter(dsl::term("module", "chat"))))
		.metric(
			"others",
			DocCountHandler::new(
				records().must_not(modules(&["faq", "task_engine", "chat", "backfill"])),
			),
		)
		.metric(
			"unknown_qnas",
			DocCountHandler::new(records().filter(dsl::term("module", "backfill"))),
		)
		.derived(DerivedMetric::complement_ratio("success_rate", "unknown_qnas", "total_asks"))
		.derived(DerivedMetric::ratio("conversations_per_session", "total_asks", "conversations"))
}

/// Sessions bucketed by start time, with feedback coverage.
pub fn session_stats(cfg: &tally_config::Search) -> MetricBundle {
	let source = || MetricSource::new(&cfg.sessions_index, SESSION_START_FIELD, cfg.term_agg_size);

	MetricBundle::new()
		.metric("sessions", DocCountHandler::new(source()))
		.metric(
			"completes",
			DocCountHandler::new(source().filter(dsl::term("status", CALL_STATUS_COMPLETE))),
		)
		.metric("feedbacks", PresentFieldHandler::new(source(), "feedback"))
		.derived(DerivedMetric::ratio("feedback_rate", "feedbacks", "sessions"))
}
