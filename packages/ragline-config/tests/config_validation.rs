use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::{Table, Value};

use ragline_config::{Config, Error};

const SAMPLE_CONFIG_TOML: &str = include_str!("fixtures/sample_config.toml");

fn sample_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Table = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let table = root
		.entry(section.to_string())
		.or_insert_with(|| Value::Table(Table::new()))
		.as_table_mut()
		.expect("Section must be a table.");

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render sample config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let mut path = env::temp_dir();

	path.push(format!("ragline_config_test_{nanos}_{}_{ordinal}.toml", std::process::id()));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> Result<Config, Error> {
	let path = write_temp_config(payload);
	let result = ragline_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn expect_validation_key(result: Result<Config, Error>, expected: &str) {
	match result {
		Err(Error::Validation { key, .. }) => assert_eq!(key, expected),
		Err(other) => panic!("Expected validation error for {expected}, got {other}."),
		Ok(_) => panic!("Expected validation error for {expected}."),
	}
}

#[test]
fn sample_config_loads_with_defaults() {
	let cfg = load_payload(SAMPLE_CONFIG_TOML.to_string()).expect("Sample config must load.");

	assert_eq!(cfg.service.request_deadline_ms, 5_000);
	assert_eq!(cfg.retrieval.fusion_k, 60);
	assert_eq!(cfg.retrieval.vector_top_k, 50);
	assert_eq!(cfg.retrieval.keyword_top_k, 50);
	assert_eq!(cfg.retrieval.max_retries, 2);
	assert_eq!(cfg.rerank.batch_size, 16);
	assert_eq!(cfg.context.token_budget, 3_500);
	assert_eq!(cfg.context.mmr_lambda, 0.7);
	assert_eq!(cfg.context.dedup_similarity_threshold, 0.85);
	assert_eq!(cfg.context.relevance_floor, 0.5);
	assert_eq!(cfg.concurrency.max_concurrent_calls_per_collaborator, 20);
	assert_eq!(cfg.cache.answer_ttl_secs, 1_200);
	assert_eq!(cfg.cache.retrieval_ttl_secs, 2_400);
	assert_eq!(cfg.cache.embedding_ttl_secs, ragline_config::EMBEDDING_TTL_SECS_MAX);
}

#[test]
fn vocabularies_are_normalized_on_load() {
	let cfg = load_payload(SAMPLE_CONFIG_TOML.to_string()).expect("Sample config must load.");

	assert_eq!(cfg.normalizer.dictionary, vec!["benefits", "policy", "reimbursement", "vacation"]);
	assert_eq!(cfg.normalizer.departments, vec!["engineering", "finance", "hr"]);
	assert_eq!(
		cfg.normalizer.synonyms.get("pto").map(Vec::as_slice),
		Some(&["paid time off".to_string()][..])
	);
	assert!(!cfg.normalizer.synonyms.contains_key("PTO"));
}

#[test]
fn answer_ttl_outside_tier_bounds_is_rejected() {
	let payload = sample_with("cache", "answer_ttl_secs", Value::Integer(3_600));

	expect_validation_key(load_payload(payload), "cache.answer_ttl_secs");
}

#[test]
fn retrieval_ttl_below_tier_bounds_is_rejected() {
	let payload = sample_with("cache", "retrieval_ttl_secs", Value::Integer(600));

	expect_validation_key(load_payload(payload), "cache.retrieval_ttl_secs");
}

#[test]
fn embedding_ttl_beyond_thirty_days_is_rejected() {
	let payload = sample_with(
		"cache",
		"embedding_ttl_secs",
		Value::Integer(ragline_config::EMBEDDING_TTL_SECS_MAX as i64 + 1),
	);

	expect_validation_key(load_payload(payload), "cache.embedding_ttl_secs");
}

#[test]
fn rerank_batch_size_outside_range_is_rejected() {
	let payload = sample_with("rerank", "batch_size", Value::Integer(32));

	expect_validation_key(load_payload(payload), "rerank.batch_size");
}

#[test]
fn mmr_lambda_outside_unit_interval_is_rejected() {
	let payload = sample_with("context", "mmr_lambda", Value::Float(1.5));

	expect_validation_key(load_payload(payload), "context.mmr_lambda");
}

#[test]
fn zero_dedup_threshold_is_rejected() {
	let payload = sample_with("context", "dedup_similarity_threshold", Value::Float(0.0));

	expect_validation_key(load_payload(payload), "context.dedup_similarity_threshold");
}

#[test]
fn embedding_dimensions_must_match_index() {
	let mut root: Table = toml::from_str(SAMPLE_CONFIG_TOML).expect("Failed to parse sample config.");
	let embedding = root
		.get_mut("providers")
		.and_then(Value::as_table_mut)
		.and_then(|providers| providers.get_mut("embedding"))
		.and_then(Value::as_table_mut)
		.expect("Sample config must include [providers.embedding].");

	embedding.insert("dimensions".to_string(), Value::Integer(768));

	let payload = toml::to_string(&root).expect("Failed to render sample config.");

	expect_validation_key(load_payload(payload), "providers.embedding.dimensions");
}

#[test]
fn missing_file_reports_read_error() {
	let path = env::temp_dir().join("ragline_config_missing_file.toml");
	let err = ragline_config::load(&path).expect_err("Missing file must fail.");

	assert!(matches!(err, Error::Read { .. }));
}
