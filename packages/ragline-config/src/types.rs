use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub context: Context,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub concurrency: Concurrency,
	#[serde(default)]
	pub normalizer: Normalizer,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
	/// Overall budget for one answer request, from receipt to returned result.
	#[serde(default = "default_request_deadline_ms")]
	pub request_deadline_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub qdrant: Qdrant,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: ProviderConfig,
	pub generation: LlmProviderConfig,
	pub summarizer: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub vector_top_k: u32,
	pub keyword_top_k: u32,
	/// The `k` in `1 / (k + rank)`.
	pub fusion_k: u32,
	/// How many fused candidates are handed to the reranker.
	pub rerank_depth: u32,
	pub max_retries: u32,
	pub retry_base_backoff_ms: u64,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			vector_top_k: 50,
			keyword_top_k: 50,
			fusion_k: 60,
			rerank_depth: 50,
			max_retries: 2,
			retry_base_backoff_ms: 100,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub batch_size: u32,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { batch_size: 16 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Context {
	pub top_k: u32,
	pub mmr_lambda: f32,
	pub dedup_similarity_threshold: f32,
	pub relevance_floor: f32,
	pub token_budget: u32,
	/// Leading candidates that are never summarized.
	pub uncompressed_head: u32,
	/// Optional. HuggingFace repo used for token counting; word counts are used when unset.
	pub tokenizer_repo: Option<String>,
}
impl Default for Context {
	fn default() -> Self {
		Self {
			top_k: 8,
			mmr_lambda: 0.7,
			dedup_similarity_threshold: 0.85,
			relevance_floor: 0.5,
			token_budget: 3_500,
			uncompressed_head: 3,
			tokenizer_repo: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	pub answer_ttl_secs: u64,
	pub retrieval_ttl_secs: u64,
	pub embedding_ttl_secs: u64,
	pub answer_capacity: usize,
	pub retrieval_capacity: usize,
	pub embedding_capacity: usize,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			enabled: true,
			answer_ttl_secs: 1_800,
			retrieval_ttl_secs: 3_600,
			embedding_ttl_secs: crate::EMBEDDING_TTL_SECS_MAX,
			answer_capacity: 1_024,
			retrieval_capacity: 2_048,
			embedding_capacity: 16_384,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Concurrency {
	pub max_concurrent_calls_per_collaborator: u32,
}
impl Default for Concurrency {
	fn default() -> Self {
		Self { max_concurrent_calls_per_collaborator: 20 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Normalizer {
	/// Domain vocabulary that spell correction may correct towards.
	pub dictionary: Vec<String>,
	/// Acronym or synonym table. Keys match whole query tokens, case-insensitively.
	pub synonyms: HashMap<String, Vec<String>>,
	pub departments: Vec<String>,
	pub regions: Vec<String>,
	pub off_topic_threshold: f32,
	pub max_edit_distance: u32,
}
impl Default for Normalizer {
	fn default() -> Self {
		Self {
			dictionary: Vec::new(),
			synonyms: HashMap::new(),
			departments: Vec::new(),
			regions: Vec::new(),
			off_topic_threshold: 0.8,
			max_edit_distance: 2,
		}
	}
}

fn default_request_deadline_ms() -> u64 {
	5_000
}
