mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Concurrency, Config, Context, EmbeddingProviderConfig, LlmProviderConfig, Normalizer,
	ProviderConfig, Providers, Qdrant, Rerank, Retrieval, Service, Storage,
};

use std::{collections::HashMap, fs, ops::RangeInclusive, path::Path};

pub const ANSWER_TTL_SECS: RangeInclusive<u64> = 900..=1_800;
pub const RETRIEVAL_TTL_SECS: RangeInclusive<u64> = 1_800..=3_600;
pub const EMBEDDING_TTL_SECS_MAX: u64 = 30 * 24 * 60 * 60;
pub const RERANK_BATCH_SIZE: RangeInclusive<u32> = 10..=20;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config =
		toml::from_str(&raw).map_err(|err| Error::Parse { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::invalid("service.http_bind", "must be non-empty."));
	}
	if cfg.service.request_deadline_ms == 0 {
		return Err(Error::invalid("service.request_deadline_ms", "must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::invalid("providers.embedding.dimensions", "must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::invalid(
			"providers.embedding.dimensions",
			"must match storage.qdrant.vector_dim.",
		));
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::invalid("storage.qdrant.collection", "must be non-empty."));
	}

	validate_retrieval(&cfg.retrieval)?;

	if !RERANK_BATCH_SIZE.contains(&cfg.rerank.batch_size) {
		return Err(Error::invalid(
			"rerank.batch_size",
			format!("must be within {RERANK_BATCH_SIZE:?}."),
		));
	}

	validate_context(&cfg.context)?;
	validate_cache(&cfg.cache)?;

	if cfg.concurrency.max_concurrent_calls_per_collaborator == 0 {
		return Err(Error::invalid(
			"concurrency.max_concurrent_calls_per_collaborator",
			"must be greater than zero.",
		));
	}

	validate_unit_interval("normalizer.off_topic_threshold", cfg.normalizer.off_topic_threshold)?;

	Ok(())
}

fn validate_retrieval(cfg: &Retrieval) -> Result<()> {
	if cfg.vector_top_k == 0 {
		return Err(Error::invalid("retrieval.vector_top_k", "must be greater than zero."));
	}
	if cfg.keyword_top_k == 0 {
		return Err(Error::invalid("retrieval.keyword_top_k", "must be greater than zero."));
	}
	if cfg.fusion_k == 0 {
		return Err(Error::invalid("retrieval.fusion_k", "must be greater than zero."));
	}
	if cfg.rerank_depth == 0 {
		return Err(Error::invalid("retrieval.rerank_depth", "must be greater than zero."));
	}
	if cfg.retry_base_backoff_ms == 0 && cfg.max_retries > 0 {
		return Err(Error::invalid(
			"retrieval.retry_base_backoff_ms",
			"must be greater than zero when retries are enabled.",
		));
	}

	Ok(())
}

fn validate_context(cfg: &Context) -> Result<()> {
	if cfg.top_k == 0 {
		return Err(Error::invalid("context.top_k", "must be greater than zero."));
	}

	validate_unit_interval("context.mmr_lambda", cfg.mmr_lambda)?;
	validate_unit_interval("context.relevance_floor", cfg.relevance_floor)?;

	if !cfg.dedup_similarity_threshold.is_finite()
		|| cfg.dedup_similarity_threshold <= 0.0
		|| cfg.dedup_similarity_threshold > 1.0
	{
		return Err(Error::invalid(
			"context.dedup_similarity_threshold",
			"must be greater than zero and at most one.",
		));
	}

	if let Some(repo) = cfg.tokenizer_repo.as_deref()
		&& repo.trim().is_empty()
	{
		return Err(Error::invalid("context.tokenizer_repo", "must be non-empty when set."));
	}

	Ok(())
}

fn validate_cache(cfg: &Cache) -> Result<()> {
	if !ANSWER_TTL_SECS.contains(&cfg.answer_ttl_secs) {
		return Err(Error::invalid(
			"cache.answer_ttl_secs",
			format!("must be within {ANSWER_TTL_SECS:?}."),
		));
	}
	if !RETRIEVAL_TTL_SECS.contains(&cfg.retrieval_ttl_secs) {
		return Err(Error::invalid(
			"cache.retrieval_ttl_secs",
			format!("must be within {RETRIEVAL_TTL_SECS:?}."),
		));
	}
	if cfg.embedding_ttl_secs == 0 || cfg.embedding_ttl_secs > EMBEDDING_TTL_SECS_MAX {
		return Err(Error::invalid(
			"cache.embedding_ttl_secs",
			format!("must be greater than zero and at most {EMBEDDING_TTL_SECS_MAX}."),
		));
	}
	if cfg.answer_capacity == 0 || cfg.retrieval_capacity == 0 || cfg.embedding_capacity == 0 {
		return Err(Error::invalid("cache", "tier capacities must be greater than zero."));
	}

	Ok(())
}

fn validate_unit_interval(key: &'static str, value: f32) -> Result<()> {
	if !value.is_finite() || !(0.0..=1.0).contains(&value) {
		return Err(Error::invalid(key, "must be a finite number within [0, 1]."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	normalize_vocabulary(&mut cfg.normalizer.dictionary);
	normalize_vocabulary(&mut cfg.normalizer.departments);
	normalize_vocabulary(&mut cfg.normalizer.regions);

	let synonyms = std::mem::take(&mut cfg.normalizer.synonyms);
	let mut normalized: HashMap<String, Vec<String>> = HashMap::with_capacity(synonyms.len());

	for (key, mut expansions) in synonyms {
		let key = key.trim().to_lowercase();

		if key.is_empty() {
			continue;
		}

		expansions.retain(|term| !term.trim().is_empty());

		normalized.entry(key).or_default().extend(expansions);
	}

	cfg.normalizer.synonyms = normalized;
}

fn normalize_vocabulary(words: &mut Vec<String>) {
	for word in words.iter_mut() {
		*word = word.trim().to_lowercase();
	}

	words.retain(|word| !word.is_empty());
	words.sort();
	words.dedup();
}
