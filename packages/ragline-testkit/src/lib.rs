//! In-memory collaborators for exercising the answer pipeline without Qdrant or model APIs.

use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use parking_lot::Mutex;
use serde_json::Map;

use ragline_config::{
	Cache, Concurrency, Config, Context, EmbeddingProviderConfig, LlmProviderConfig, Normalizer,
	ProviderConfig, Providers, Qdrant, Rerank, Retrieval, Service, Storage,
};
use ragline_domain::{ChunkMetadata, IndexHit, QueryFilters};
use ragline_service::{
	BoxFuture, Collaborators, EmbeddingProvider, Error, GenerationProvider, KeywordIndex,
	RaglineService, RerankProvider, Result, Summarizer, VectorIndex,
};

pub const TEST_DIMENSIONS: u32 = 64;

/// Config with small vectors, millisecond retry backoff, and an HR-flavored vocabulary.
pub fn test_config() -> Config {
	let mut synonyms = HashMap::new();

	synonyms.insert("pto".to_string(), vec!["paid time off".to_string()]);

	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
			request_deadline_ms: 2_000,
		},
		storage: Storage {
			qdrant: Qdrant {
				url: "http://127.0.0.1:6334".to_string(),
				collection: "ragline_test".to_string(),
				vector_dim: TEST_DIMENSIONS,
			},
		},
		providers: Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/embeddings".to_string(),
				model: "hash".to_string(),
				dimensions: TEST_DIMENSIONS,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			rerank: ProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/rerank".to_string(),
				model: "scripted".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			generation: llm_provider("/chat/completions"),
			summarizer: llm_provider("/chat/completions"),
		},
		retrieval: Retrieval { retry_base_backoff_ms: 1, ..Default::default() },
		rerank: Rerank::default(),
		context: Context::default(),
		cache: Cache::default(),
		concurrency: Concurrency::default(),
		normalizer: Normalizer {
			dictionary: vec![
				"vacation".to_string(),
				"policy".to_string(),
				"reimbursement".to_string(),
				"expense".to_string(),
			],
			synonyms,
			departments: vec!["finance".to_string(), "hr".to_string()],
			regions: vec!["emea".to_string()],
			..Default::default()
		},
	}
}

fn llm_provider(path: &str) -> LlmProviderConfig {
	LlmProviderConfig {
		provider_id: "test".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: "test-key".to_string(),
		path: path.to_string(),
		model: "scripted".to_string(),
		temperature: 0.0,
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

/// Lowercased alphanumeric words of `text`.
pub fn words(text: &str) -> Vec<String> {
	text.split(|ch: char| !ch.is_alphanumeric())
		.filter(|word| !word.is_empty())
		.map(str::to_lowercase)
		.collect()
}

/// Bag-of-words vector: each word bumps one blake3-chosen dimension. Unit length.
pub fn hash_embedding(text: &str, dimensions: usize) -> Vec<f32> {
	let dimensions = dimensions.max(1);
	let mut vector = vec![0.0_f32; dimensions];

	for word in words(text) {
		let digest = blake3::hash(word.as_bytes());
		let bytes = digest.as_bytes();
		let mut head = [0_u8; 8];

		head.copy_from_slice(&bytes[..8]);

		let slot = (u64::from_le_bytes(head) % dimensions as u64) as usize;

		vector[slot] += 1.0;
	}

	let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vector {
			*value /= norm;
		}
	}

	vector
}

pub fn chunk_hit(chunk_id: &str, document_id: &str, text: &str, groups: &[&str]) -> IndexHit {
	IndexHit {
		chunk_id: chunk_id.to_string(),
		document_id: document_id.to_string(),
		text: text.to_string(),
		score: 0.0,
		metadata: ChunkMetadata {
			acl_groups: groups.iter().map(|group| group.to_string()).collect(),
			..Default::default()
		},
	}
}

fn unavailable(what: &str) -> Error {
	Error::Storage { message: format!("{what} is unavailable") }
}

struct IndexedChunk {
	hit: IndexHit,
	embedding: Vec<f32>,
}

/// Both index traits over one in-memory chunk list.
///
/// Department, region, and ACL filters are pushed down as the real index does; date ranges
/// are not. Scripted results, when set, replace the computed ranking for that modality.
pub struct InMemoryIndex {
	dimensions: usize,
	chunks: Mutex<Vec<IndexedChunk>>,
	vector_script: Mutex<Option<Vec<IndexHit>>>,
	keyword_script: Mutex<Option<Vec<IndexHit>>>,
	vector_calls: AtomicUsize,
	keyword_calls: AtomicUsize,
	fail_vector: AtomicBool,
	fail_keyword: AtomicBool,
	ignore_filters: AtomicBool,
}
impl InMemoryIndex {
	pub fn new(dimensions: u32) -> Self {
		Self {
			dimensions: dimensions as usize,
			chunks: Mutex::new(Vec::new()),
			vector_script: Mutex::new(None),
			keyword_script: Mutex::new(None),
			vector_calls: AtomicUsize::new(0),
			keyword_calls: AtomicUsize::new(0),
			fail_vector: AtomicBool::new(false),
			fail_keyword: AtomicBool::new(false),
			ignore_filters: AtomicBool::new(false),
		}
	}

	pub fn insert(&self, hit: IndexHit) {
		let embedding = hash_embedding(&hit.text, self.dimensions);

		self.chunks.lock().push(IndexedChunk { hit, embedding });
	}

	pub fn script_vector(&self, hits: Vec<IndexHit>) {
		*self.vector_script.lock() = Some(hits);
	}

	pub fn script_keyword(&self, hits: Vec<IndexHit>) {
		*self.keyword_script.lock() = Some(hits);
	}

	pub fn fail_vector(&self, fail: bool) {
		self.fail_vector.store(fail, Ordering::SeqCst);
	}

	pub fn fail_keyword(&self, fail: bool) {
		self.fail_keyword.store(fail, Ordering::SeqCst);
	}

	/// Returns every chunk regardless of filters, like a misconfigured index would.
	pub fn ignore_filters(&self, ignore: bool) {
		self.ignore_filters.store(ignore, Ordering::SeqCst);
	}

	pub fn vector_calls(&self) -> usize {
		self.vector_calls.load(Ordering::SeqCst)
	}

	pub fn keyword_calls(&self) -> usize {
		self.keyword_calls.load(Ordering::SeqCst)
	}

	pub fn search_calls(&self) -> usize {
		self.vector_calls() + self.keyword_calls()
	}

	fn pushed_down(&self, filters: &QueryFilters, metadata: &ChunkMetadata) -> bool {
		if self.ignore_filters.load(Ordering::SeqCst) {
			return true;
		}

		QueryFilters { date_range: None, ..filters.clone() }.admits(metadata)
	}

	fn ranked<F>(
		&self,
		script: &Mutex<Option<Vec<IndexHit>>>,
		filters: &QueryFilters,
		top_k: u32,
		mut score: F,
	) -> Vec<IndexHit>
	where
		F: FnMut(&IndexedChunk) -> f32,
	{
		if let Some(hits) = script.lock().clone() {
			return hits
				.into_iter()
				.filter(|hit| self.pushed_down(filters, &hit.metadata))
				.take(top_k as usize)
				.collect();
		}

		let chunks = self.chunks.lock();
		let mut hits: Vec<IndexHit> = chunks
			.iter()
			.filter(|chunk| self.pushed_down(filters, &chunk.hit.metadata))
			.filter_map(|chunk| {
				let value = score(chunk);

				(value > 0.0).then(|| IndexHit { score: value, ..chunk.hit.clone() })
			})
			.collect();

		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
		hits.truncate(top_k as usize);

		hits
	}
}
impl VectorIndex for InMemoryIndex {
	fn search_vectors<'a>(
		&'a self,
		vector: &'a [f32],
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		self.vector_calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail_vector.load(Ordering::SeqCst) {
				return Err(unavailable("vector index"));
			}

			Ok(self.ranked(&self.vector_script, filters, top_k, |chunk| {
				chunk.embedding.iter().zip(vector).map(|(l, r)| l * r).sum()
			}))
		})
	}
}
impl KeywordIndex for InMemoryIndex {
	fn search_keywords<'a>(
		&'a self,
		text: &'a str,
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		self.keyword_calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail_keyword.load(Ordering::SeqCst) {
				return Err(unavailable("keyword index"));
			}

			let terms = words(text);

			Ok(self.ranked(&self.keyword_script, filters, top_k, |chunk| {
				let chunk_words = words(&chunk.hit.text);

				terms.iter().filter(|term| chunk_words.contains(term)).count() as f32
			}))
		})
	}
}

#[derive(Default)]
pub struct HashEmbedding {
	calls: AtomicUsize,
	fail: AtomicBool,
}
impl HashEmbedding {
	pub fn fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl EmbeddingProvider for HashEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail.load(Ordering::SeqCst) {
				return Err(Error::Provider { message: "embedding provider is down".to_string() });
			}

			Ok(texts.iter().map(|text| hash_embedding(text, cfg.dimensions as usize)).collect())
		})
	}
}

/// Scores a document by the share of query words it contains, unless a fixed score was set
/// for that exact document text.
#[derive(Default)]
pub struct ScriptedRerank {
	scores: Mutex<HashMap<String, f32>>,
	calls: AtomicUsize,
	fail: AtomicBool,
}
impl ScriptedRerank {
	pub fn set_score(&self, text: &str, score: f32) {
		self.scores.lock().insert(text.to_string(), score);
	}

	pub fn fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RerankProvider for ScriptedRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if self.fail.load(Ordering::SeqCst) {
			return Box::pin(async { Err(Error::Provider { message: "reranker is down".to_string() }) });
		}

		let terms = words(query);
		let scripted = self.scores.lock();
		let scores: Vec<f32> = docs
			.iter()
			.map(|doc| {
				if let Some(score) = scripted.get(doc) {
					return *score;
				}

				let doc_words = words(doc);
				let matched = terms.iter().filter(|term| doc_words.contains(term)).count();

				matched as f32 / terms.len().max(1) as f32
			})
			.collect();

		Box::pin(async move { Ok(scores) })
	}
}

/// Keeps the first `target_tokens` words of the input.
#[derive(Default)]
pub struct StubSummarizer {
	calls: AtomicUsize,
	fail: AtomicBool,
}
impl StubSummarizer {
	pub fn fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl Summarizer for StubSummarizer {
	fn summarize<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		text: &'a str,
		target_tokens: u32,
	) -> BoxFuture<'a, Result<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail.load(Ordering::SeqCst) {
				return Err(Error::Provider { message: "summarizer is down".to_string() });
			}

			Ok(words(text).into_iter().take(target_tokens as usize).collect::<Vec<_>>().join(" "))
		})
	}
}

/// Returns a fixed reply and records every prompt it was sent.
pub struct ScriptedGenerator {
	reply: Mutex<String>,
	prompts: Mutex<Vec<String>>,
	delay: Mutex<Option<Duration>>,
	fail: AtomicBool,
}
impl ScriptedGenerator {
	pub fn new(reply: &str) -> Self {
		Self {
			reply: Mutex::new(reply.to_string()),
			prompts: Mutex::new(Vec::new()),
			delay: Mutex::new(None),
			fail: AtomicBool::new(false),
		}
	}

	pub fn set_reply(&self, reply: &str) {
		*self.reply.lock() = reply.to_string();
	}

	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = Some(delay);
	}

	pub fn fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.prompts.lock().len()
	}

	pub fn last_prompt(&self) -> Option<String> {
		self.prompts.lock().last().cloned()
	}
}
impl GenerationProvider for ScriptedGenerator {
	fn generate<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		prompt: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		self.prompts.lock().push(prompt.to_string());

		let delay = *self.delay.lock();
		let reply = self.reply.lock().clone();

		Box::pin(async move {
			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}
			if self.fail.load(Ordering::SeqCst) {
				return Err(Error::Provider { message: "generator is down".to_string() });
			}

			Ok(reply)
		})
	}
}

/// One of each double, shared with the service under test so tests can steer and inspect
/// them.
pub struct Doubles {
	pub index: Arc<InMemoryIndex>,
	pub embedding: Arc<HashEmbedding>,
	pub rerank: Arc<ScriptedRerank>,
	pub summarizer: Arc<StubSummarizer>,
	pub generator: Arc<ScriptedGenerator>,
}
impl Doubles {
	pub fn new() -> Self {
		Self {
			index: Arc::new(InMemoryIndex::new(TEST_DIMENSIONS)),
			embedding: Arc::new(HashEmbedding::default()),
			rerank: Arc::new(ScriptedRerank::default()),
			summarizer: Arc::new(StubSummarizer::default()),
			generator: Arc::new(ScriptedGenerator::new("See [Source 1].")),
		}
	}

	pub fn collaborators(&self) -> Collaborators {
		Collaborators {
			vector: self.index.clone(),
			keyword: self.index.clone(),
			embedding: self.embedding.clone(),
			rerank: self.rerank.clone(),
			summarizer: self.summarizer.clone(),
			generation: self.generator.clone(),
		}
	}

	pub fn service(&self, cfg: Config) -> RaglineService {
		RaglineService::new(cfg, self.collaborators())
	}
}
impl Default for Doubles {
	fn default() -> Self {
		Self::new()
	}
}
