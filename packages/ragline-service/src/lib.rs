pub mod answer;
pub mod cache;
pub mod error;
pub mod outcome;
pub mod postprocess;
pub mod rerank;
pub mod retrieve;

mod limits;
mod retry;

pub use cache::{CacheEntry, CacheKey, CacheLayer, CacheStats, CacheTier, CacheValue, ChunkSource};
pub use error::{Error, Result};
pub use limits::CallLimits;
pub use outcome::StageOutcome;

use std::{future::Future, pin::Pin, sync::Arc};

use ragline_config::{Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig};
use ragline_domain::{IndexHit, QueryFilters, QueryNormalizer};
use ragline_providers::{embedding, generation, rerank as rerank_api, summarize};
use ragline_storage::QdrantIndex;
use ragline_tokens::{TokenCounter, TokenizerCounter, WordTokenCounter};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn search_vectors<'a>(
		&'a self,
		vector: &'a [f32],
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>>;
}

pub trait KeywordIndex
where
	Self: Send + Sync,
{
	fn search_keywords<'a>(
		&'a self,
		text: &'a str,
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>>;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>>;
}

pub trait Summarizer
where
	Self: Send + Sync,
{
	fn summarize<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		text: &'a str,
		target_tokens: u32,
	) -> BoxFuture<'a, Result<String>>;
}

pub trait GenerationProvider
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		prompt: &'a str,
	) -> BoxFuture<'a, Result<String>>;
}

/// Every external system one request may call.
#[derive(Clone)]
pub struct Collaborators {
	pub vector: Arc<dyn VectorIndex>,
	pub keyword: Arc<dyn KeywordIndex>,
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub summarizer: Arc<dyn Summarizer>,
	pub generation: Arc<dyn GenerationProvider>,
}
impl Collaborators {
	/// Qdrant for both indexes and the HTTP providers for everything else.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let index = Arc::new(QdrantIndex::new(&cfg.storage.qdrant)?);
		let providers = Arc::new(HttpProviders);

		Ok(Self {
			vector: index.clone(),
			keyword: index,
			embedding: providers.clone(),
			rerank: providers.clone(),
			summarizer: providers.clone(),
			generation: providers,
		})
	}
}

/// The answer pipeline and the state it shares across requests.
///
/// Stages live in their own modules as `impl RaglineService` blocks: [`retrieve`],
/// [`rerank`], [`postprocess`], and [`answer`].
pub struct RaglineService {
	pub cfg: Config,
	pub collaborators: Collaborators,
	pub cache: CacheLayer,
	pub limits: CallLimits,
	pub normalizer: QueryNormalizer,
	pub tokens: Arc<dyn TokenCounter>,
}
impl RaglineService {
	pub fn new(cfg: Config, collaborators: Collaborators) -> Self {
		let tokens = token_counter(&cfg);

		Self::with_token_counter(cfg, collaborators, tokens)
	}

	pub fn with_token_counter(
		cfg: Config,
		collaborators: Collaborators,
		tokens: Arc<dyn TokenCounter>,
	) -> Self {
		let cache = CacheLayer::new(&cfg.cache);
		let limits = CallLimits::new(cfg.concurrency.max_concurrent_calls_per_collaborator);
		let normalizer = QueryNormalizer::from_config(&cfg.normalizer);

		Self { cfg, collaborators, cache, limits, normalizer, tokens }
	}

	pub fn from_config(cfg: Config) -> Result<Self> {
		let collaborators = Collaborators::from_config(&cfg)?;

		Ok(Self::new(cfg, collaborators))
	}

	/// Identifies the embedding space for cache keys.
	pub(crate) fn embedding_model(&self) -> String {
		let provider = &self.cfg.providers.embedding;

		format!("{}:{}:{}", provider.provider_id, provider.model, provider.dimensions)
	}
}

fn token_counter(cfg: &Config) -> Arc<dyn TokenCounter> {
	let Some(repo) = cfg.context.tokenizer_repo.as_deref() else {
		return Arc::new(WordTokenCounter);
	};

	match TokenizerCounter::from_pretrained(repo) {
		Ok(counter) => Arc::new(counter),
		Err(err) => {
			tracing::warn!(error = %err, repo, "Failed to load tokenizer. Using word counts.");

			Arc::new(WordTokenCounter)
		},
	}
}

struct HttpProviders;

impl EmbeddingProvider for HttpProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}

impl RerankProvider for HttpProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		docs: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { Ok(rerank_api::rerank(cfg, query, docs).await?) })
	}
}

impl Summarizer for HttpProviders {
	fn summarize<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		text: &'a str,
		target_tokens: u32,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(summarize::summarize(cfg, text, target_tokens).await?) })
	}
}

impl GenerationProvider for HttpProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		prompt: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(generation::generate(cfg, prompt).await?) })
	}
}

impl VectorIndex for QdrantIndex {
	fn search_vectors<'a>(
		&'a self,
		vector: &'a [f32],
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		Box::pin(async move { Ok(QdrantIndex::search_vectors(self, vector, filters, top_k).await?) })
	}
}

impl KeywordIndex for QdrantIndex {
	fn search_keywords<'a>(
		&'a self,
		text: &'a str,
		filters: &'a QueryFilters,
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		Box::pin(async move { Ok(QdrantIndex::search_keywords(self, text, filters, top_k).await?) })
	}
}
