//! Tiered answer, retrieval, and embedding cache shared by all requests.

use std::{
	collections::HashMap,
	future::Future,
	num::NonZeroUsize,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use ragline_config::{ANSWER_TTL_SECS, EMBEDDING_TTL_SECS_MAX, RETRIEVAL_TTL_SECS};
use ragline_domain::{AnswerResult, Candidate, DocumentUpdated, QueryFilters};

const CACHE_KEY_SCHEMA_VERSION: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheTier {
	Answer,
	Retrieval,
	Embedding,
}
impl CacheTier {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Answer => "answer",
			Self::Retrieval => "retrieval",
			Self::Embedding => "embedding",
		}
	}

	/// Inclusive TTL bounds every stored entry of this tier is clamped to.
	pub fn ttl_bounds(self) -> (Duration, Duration) {
		let (min, max) = match self {
			Self::Answer => (*ANSWER_TTL_SECS.start(), *ANSWER_TTL_SECS.end()),
			Self::Retrieval => (*RETRIEVAL_TTL_SECS.start(), *RETRIEVAL_TTL_SECS.end()),
			Self::Embedding => (1, EMBEDDING_TTL_SECS_MAX),
		};

		(Duration::from_secs(min), Duration::from_secs(max))
	}

	fn clamp_ttl(self, ttl: Duration) -> Duration {
		let (min, max) = self.ttl_bounds();

		ttl.clamp(min, max)
	}
}

/// Opaque blake3 digest. Keys never carry the raw query text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);
impl CacheKey {
	/// Key for answer and retrieval entries.
	///
	/// The ACL groups are part of the digest, so identical questions from different scopes
	/// never share an entry.
	pub fn derive(normalized_text: &str, filters: &QueryFilters, acl_groups: &[String]) -> Self {
		let mut groups = acl_groups.to_vec();

		groups.sort();
		groups.dedup();

		let pairs: Vec<[String; 2]> = filters
			.pairs()
			.into_iter()
			.map(|(key, value)| [key.to_string(), value])
			.collect();
		let payload = serde_json::json!({
			"kind": "query",
			"schema_version": CACHE_KEY_SCHEMA_VERSION,
			"text": normalized_text.trim(),
			"filters": pairs,
			"acl_groups": groups,
		});

		Self::digest(&payload)
	}

	pub fn query_embedding(normalized_text: &str, model: &str) -> Self {
		Self::digest(&serde_json::json!({
			"kind": "query_embedding",
			"schema_version": CACHE_KEY_SCHEMA_VERSION,
			"text": normalized_text.trim(),
			"model": model,
		}))
	}

	pub fn chunk_embedding(document_id: &str, chunk_hash: &str, model: &str) -> Self {
		Self::digest(&serde_json::json!({
			"kind": "chunk_embedding",
			"schema_version": CACHE_KEY_SCHEMA_VERSION,
			"document_id": document_id,
			"chunk_hash": chunk_hash,
			"model": model,
		}))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Short prefix for log lines.
	pub fn prefix(&self) -> &str {
		&self.0[..self.0.len().min(12)]
	}

	fn digest(payload: &serde_json::Value) -> Self {
		// A `Value` built from `json!` always serializes.
		let raw = serde_json::to_vec(payload).unwrap_or_default();

		Self(blake3::hash(&raw).to_hex().to_string())
	}
}

/// Where a chunk embedding came from, for invalidation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSource {
	pub document_id: String,
	pub chunk_hash: String,
}

#[derive(Clone, Debug)]
pub enum CacheValue {
	Answer { result: Box<AnswerResult>, document_ids: Vec<String> },
	Retrieval(Vec<Candidate>),
	Embedding { vector: Vec<f32>, source: Option<ChunkSource> },
}
impl CacheValue {
	pub fn tier(&self) -> CacheTier {
		match self {
			Self::Answer { .. } => CacheTier::Answer,
			Self::Retrieval(_) => CacheTier::Retrieval,
			Self::Embedding { .. } => CacheTier::Embedding,
		}
	}

	pub fn references_document(&self, document_id: &str) -> bool {
		match self {
			Self::Answer { result, document_ids } =>
				document_ids.iter().any(|id| id == document_id)
					|| result.citations.iter().any(|citation| citation.document_id == document_id),
			Self::Retrieval(candidates) =>
				candidates.iter().any(|candidate| candidate.document_id == document_id),
			Self::Embedding { source, .. } =>
				source.as_ref().map(|source| source.document_id == document_id).unwrap_or(false),
		}
	}
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
	pub key: CacheKey,
	pub value: CacheValue,
	pub inserted_at: Instant,
	pub ttl: Duration,
}
impl CacheEntry {
	pub fn tier(&self) -> CacheTier {
		self.value.tier()
	}

	pub fn is_expired(&self, now: Instant) -> bool {
		now.saturating_duration_since(self.inserted_at) >= self.ttl
	}
}

/// Whether `event` makes `entry` stale.
///
/// Answer and retrieval entries go when they reference the document at all. Chunk
/// embeddings go only when the chunk content changed: the event names another hash, or no
/// hash at all.
pub fn invalidated_by(entry: &CacheEntry, event: &DocumentUpdated) -> bool {
	match &entry.value {
		CacheValue::Embedding { source: Some(source), .. } => {
			source.document_id == event.document_id
				&& event.chunk_hash.as_deref().map(|hash| hash != source.chunk_hash).unwrap_or(true)
		},
		CacheValue::Embedding { source: None, .. } => false,
		value => value.references_document(&event.document_id),
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierStats {
	pub hits: u64,
	pub misses: u64,
	pub entries: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub answer: TierStats,
	pub retrieval: TierStats,
	pub embedding: TierStats,
}

struct Tier {
	tier: CacheTier,
	entries: Mutex<LruCache<CacheKey, CacheEntry>>,
	default_ttl: Duration,
	hits: AtomicU64,
	misses: AtomicU64,
}
impl Tier {
	fn new(tier: CacheTier, capacity: usize, default_ttl_secs: u64) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

		Self {
			tier,
			entries: Mutex::new(LruCache::new(capacity)),
			default_ttl: tier.clamp_ttl(Duration::from_secs(default_ttl_secs)),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
		let now = Instant::now();
		let mut entries = self.entries.lock();
		let live = entries.get(key).map(|entry| (!entry.is_expired(now)).then(|| entry.clone()));
		let found = match live {
			Some(Some(entry)) => Some(entry),
			Some(None) => {
				entries.pop(key);

				None
			},
			None => None,
		};

		drop(entries);

		let counter = if found.is_some() { &self.hits } else { &self.misses };

		counter.fetch_add(1, Ordering::Relaxed);

		tracing::debug!(
			tier = self.tier.as_str(),
			cache_key_prefix = key.prefix(),
			hit = found.is_some(),
			"Cache lookup."
		);

		found
	}

	fn store(&self, key: CacheKey, value: CacheValue, ttl: Duration) {
		let entry = CacheEntry {
			key: key.clone(),
			value,
			inserted_at: Instant::now(),
			ttl: self.tier.clamp_ttl(ttl),
		};

		self.entries.lock().put(key, entry);
	}

	fn retain<F>(&self, mut remove: F) -> usize
	where
		F: FnMut(&CacheEntry) -> bool,
	{
		let mut entries = self.entries.lock();
		let doomed: Vec<CacheKey> =
			entries.iter().filter(|(_, entry)| remove(entry)).map(|(key, _)| key.clone()).collect();

		for key in &doomed {
			entries.pop(key);
		}

		doomed.len()
	}

	fn stats(&self) -> TierStats {
		TierStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			entries: self.entries.lock().len(),
		}
	}
}

type InflightTable = Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>;

pub struct CacheLayer {
	enabled: bool,
	answer: Tier,
	retrieval: Tier,
	embedding: Tier,
	inflight: InflightTable,
}
impl CacheLayer {
	pub fn new(cfg: &ragline_config::Cache) -> Self {
		Self {
			enabled: cfg.enabled,
			answer: Tier::new(CacheTier::Answer, cfg.answer_capacity, cfg.answer_ttl_secs),
			retrieval: Tier::new(
				CacheTier::Retrieval,
				cfg.retrieval_capacity,
				cfg.retrieval_ttl_secs,
			),
			embedding: Tier::new(
				CacheTier::Embedding,
				cfg.embedding_capacity,
				cfg.embedding_ttl_secs,
			),
			inflight: Mutex::new(HashMap::new()),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Live entry for `key`. Expired entries are removed and reported as absent.
	pub fn lookup(&self, tier: CacheTier, key: &CacheKey) -> Option<CacheEntry> {
		if !self.enabled {
			return None;
		}

		self.tier(tier).lookup(key)
	}

	/// Inserts or wholly replaces the entry under `key`. The TTL is clamped to the tier's
	/// bounds.
	pub fn store(&self, tier: CacheTier, key: CacheKey, value: CacheValue, ttl: Duration) {
		if !self.enabled {
			return;
		}
		if value.tier() != tier {
			tracing::warn!(
				tier = tier.as_str(),
				value_tier = value.tier().as_str(),
				"Refusing to store a value in the wrong cache tier."
			);

			return;
		}

		self.tier(tier).store(key, value, ttl);
	}

	/// Stores with the tier's configured TTL.
	pub fn store_default(&self, key: CacheKey, value: CacheValue) {
		let tier = value.tier();
		let ttl = self.tier(tier).default_ttl;

		self.store(tier, key, value, ttl);
	}

	pub fn lookup_answer(&self, key: &CacheKey) -> Option<AnswerResult> {
		match self.lookup(CacheTier::Answer, key)?.value {
			CacheValue::Answer { result, .. } => Some(*result),
			_ => None,
		}
	}

	pub fn lookup_retrieval(&self, key: &CacheKey) -> Option<Vec<Candidate>> {
		match self.lookup(CacheTier::Retrieval, key)?.value {
			CacheValue::Retrieval(candidates) => Some(candidates),
			_ => None,
		}
	}

	pub fn lookup_embedding(&self, key: &CacheKey) -> Option<Vec<f32>> {
		match self.lookup(CacheTier::Embedding, key)?.value {
			CacheValue::Embedding { vector, .. } => Some(vector),
			_ => None,
		}
	}

	/// Removes every entry, in any tier, matching `predicate`. Returns how many went.
	pub fn invalidate<F>(&self, mut predicate: F) -> usize
	where
		F: FnMut(&CacheEntry) -> bool,
	{
		[&self.answer, &self.retrieval, &self.embedding]
			.into_iter()
			.map(|tier| tier.retain(&mut predicate))
			.sum()
	}

	pub fn invalidate_document(&self, event: &DocumentUpdated) -> usize {
		let removed = self.invalidate(|entry| invalidated_by(entry, event));

		tracing::info!(
			document_id = %event.document_id,
			chunk_hash = event.chunk_hash.as_deref().unwrap_or("-"),
			removed,
			"Invalidated cache entries for updated document."
		);

		removed
	}

	/// Runs `compute` while holding the in-flight lock for `key`.
	///
	/// Concurrent callers with the same key run one after another, so a caller that waited
	/// should re-check the cache inside `compute`. The lock entry is dropped once the last
	/// caller leaves, including callers cancelled mid-flight.
	pub async fn singleflight<F, Fut, T>(&self, key: &CacheKey, compute: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let lock = self.inflight.lock().entry(key.clone()).or_default().clone();
		let _slot = InflightSlot { table: &self.inflight, key, lock: lock.clone() };
		let _guard = lock.lock().await;

		compute().await
	}

	pub fn inflight_len(&self) -> usize {
		self.inflight.lock().len()
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			answer: self.answer.stats(),
			retrieval: self.retrieval.stats(),
			embedding: self.embedding.stats(),
		}
	}

	fn tier(&self, tier: CacheTier) -> &Tier {
		match tier {
			CacheTier::Answer => &self.answer,
			CacheTier::Retrieval => &self.retrieval,
			CacheTier::Embedding => &self.embedding,
		}
	}
}

struct InflightSlot<'a> {
	table: &'a InflightTable,
	key: &'a CacheKey,
	lock: Arc<tokio::sync::Mutex<()>>,
}
impl Drop for InflightSlot<'_> {
	fn drop(&mut self) {
		let mut table = self.table.lock();

		// Table entry, this slot, and the caller's local handle.
		if Arc::strong_count(&self.lock) <= 3 {
			table.remove(self.key);
		}
	}
}
