use std::collections::HashMap;

use time::macros::date;

use ragline_config::Normalizer;
use ragline_domain::{
	AnswerOutcome, AnswerResult, Intent, QueryNormalizer, Scope, ScopeViolation,
	query::DateRange,
};

fn normalizer_config() -> Normalizer {
	let mut synonyms = HashMap::new();

	synonyms.insert("pto".to_string(), vec!["paid time off".to_string()]);

	Normalizer {
		dictionary: vec![
			"vacation".to_string(),
			"policy".to_string(),
			"reimbursement".to_string(),
		],
		synonyms,
		departments: vec!["hr".to_string(), "finance".to_string()],
		regions: vec!["emea".to_string()],
		..Default::default()
	}
}

fn hr_scope() -> Scope {
	Scope::new(["HR"])
}

#[test]
fn weather_question_is_confidently_off_topic() {
	let query = QueryNormalizer::from_config(&normalizer_config())
		.normalize("what is the weather today", &hr_scope());

	assert_eq!(query.intent, Intent::OffTopic);
	assert!(query.intent_confidence >= 0.8);
}

#[test]
fn normalizes_corrects_and_expands() {
	let query = QueryNormalizer::from_config(&normalizer_config())
		.normalize("How much PTO does the vacaton policy give?", &hr_scope());

	assert_eq!(query.normalized, "how much pto paid time off does the vacation policy give?");
	assert_eq!(query.raw, "How much PTO does the vacaton policy give?");
	assert_eq!(query.intent, Intent::Factual);
}

#[test]
fn inferred_filters_never_touch_acl_groups() {
	let query = QueryNormalizer::from_config(&normalizer_config())
		.normalize("finance reimbursement rules for admins since 2023", &Scope::new(["HR", "HR"]));

	assert_eq!(query.filters.acl_groups, vec!["HR".to_string()]);
	assert_eq!(query.filters.department.as_deref(), Some("finance"));
	assert_eq!(
		query.filters.date_range,
		Some(DateRange { from: Some(date!(2023 - 01 - 01)), to: None })
	);
}

#[test]
fn historical_and_comparative_queries_retain_history() {
	let normalizer = QueryNormalizer::from_config(&normalizer_config());

	assert!(normalizer.normalize("what was the previous vacation policy", &hr_scope()).retains_history());
	assert!(normalizer.normalize("compare vacation policy versions", &hr_scope()).retains_history());
	assert!(!normalizer.normalize("what is the vacation policy", &hr_scope()).retains_history());
}

#[test]
fn scope_validation_reports_violations() {
	assert_eq!(Scope::new(Vec::<String>::new()).validate(), Err(ScopeViolation::NoGroups));

	let err = Scope::new(["hr", "payroll team"]).validate().expect_err("Expected a violation.");

	assert_eq!(err, ScopeViolation::InvalidGroupChar { group: "payroll team".to_string() });
	assert_eq!(err.to_string(), "scope group \"payroll team\" contains unsupported characters");
}

#[test]
fn not_grounded_result_serializes_with_snake_case_outcome() {
	let result = AnswerResult::not_grounded(uuid::Uuid::new_v4(), Vec::new());
	let value = serde_json::to_value(&result).expect("Failed to serialize result.");

	assert_eq!(result.outcome, AnswerOutcome::NotGrounded);
	assert_eq!(value["outcome"], "not_grounded");
	assert_eq!(value["grounded"], false);
	assert!(value["created_at"].as_str().is_some());
}
