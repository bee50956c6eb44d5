use std::{cmp::Ordering, collections::HashMap};

use ragline_domain::{Candidate, Degradation, IndexHit, Query, QueryFilters};

use crate::{
	CacheKey, CacheValue, Error, RaglineService, Result, StageOutcome, limits,
	retry::{self, RetryPolicy},
};

impl RaglineService {
	/// Hybrid retrieval: dense and BM25 searches joined, then fused by reciprocal rank.
	///
	/// One failed modality degrades to the other; both failing is `Unavailable` with a
	/// [`Error::RetrievalUnavailable`].
	pub async fn retrieve(&self, query: &Query) -> StageOutcome<Vec<Candidate>> {
		let (vector, keyword) = tokio::join!(self.vector_path(query), self.keyword_path(query));
		let fusion_k = self.cfg.retrieval.fusion_k;

		match (vector, keyword) {
			(Ok(vector), Ok(keyword)) => StageOutcome::Ok(fuse_rrf(vector, keyword, fusion_k)),
			(Ok(vector), Err(err)) => {
				tracing::warn!(error = %err, "Keyword search unavailable. Using vector results only.");

				StageOutcome::Degraded(
					fuse_rrf(vector, Vec::new(), fusion_k),
					Degradation::KeywordSearchUnavailable,
				)
			},
			(Err(err), Ok(keyword)) => {
				tracing::warn!(error = %err, "Vector search unavailable. Using keyword results only.");

				StageOutcome::Degraded(
					fuse_rrf(Vec::new(), keyword, fusion_k),
					Degradation::VectorSearchUnavailable,
				)
			},
			(Err(vector_err), Err(keyword_err)) => {
				tracing::error!(
					vector_error = %vector_err,
					keyword_error = %keyword_err,
					"Both retrieval paths failed."
				);

				StageOutcome::Unavailable(Error::RetrievalUnavailable {
					message: format!("vector: {vector_err}; keyword: {keyword_err}"),
				})
			},
		}
	}

	/// Embedding for the normalized query text, from the embedding tier when possible.
	pub async fn query_embedding(&self, query: &Query) -> Result<Vec<f32>> {
		let model = self.embedding_model();
		let key = CacheKey::query_embedding(&query.normalized, &model);

		if let Some(vector) = self.cache.lookup_embedding(&key) {
			return Ok(vector);
		}

		let texts: &[String] = &[query.normalized.clone()];
		let vector = retry::with_retries(self.retry_policy(), "embed_query", || async move {
			let _permit = limits::acquire(&self.limits.embedding, "embedding").await?;
			let mut vectors =
				self.collaborators.embedding.embed(&self.cfg.providers.embedding, texts).await?;

			vectors.pop().ok_or_else(|| Error::Provider {
				message: "embedding provider returned no vector".to_string(),
			})
		})
		.await?;

		if vector.len() != self.cfg.providers.embedding.dimensions as usize {
			return Err(Error::Provider {
				message: format!(
					"query embedding has {} dimensions, expected {}",
					vector.len(),
					self.cfg.providers.embedding.dimensions
				),
			});
		}

		self.cache.store_default(key, CacheValue::Embedding { vector: vector.clone(), source: None });

		Ok(vector)
	}

	pub(crate) fn retry_policy(&self) -> RetryPolicy {
		RetryPolicy::from_config(&self.cfg.retrieval)
	}

	async fn vector_path(&self, query: &Query) -> Result<Vec<IndexHit>> {
		let vector = self.query_embedding(query).await?;
		let vector = vector.as_slice();
		let top_k = self.cfg.retrieval.vector_top_k;
		let hits = retry::with_retries(self.retry_policy(), "search_vectors", || async move {
			let _permit = limits::acquire(&self.limits.vector, "vector index").await?;

			self.collaborators.vector.search_vectors(vector, &query.filters, top_k).await
		})
		.await?;

		Ok(admit_hits(hits, &query.filters, "vector"))
	}

	async fn keyword_path(&self, query: &Query) -> Result<Vec<IndexHit>> {
		let top_k = self.cfg.retrieval.keyword_top_k;
		let hits = retry::with_retries(self.retry_policy(), "search_keywords", || async move {
			let _permit = limits::acquire(&self.limits.keyword, "keyword index").await?;

			self.collaborators.keyword.search_keywords(&query.normalized, &query.filters, top_k).await
		})
		.await?;

		Ok(admit_hits(hits, &query.filters, "keyword"))
	}
}

/// Drops hits the caller may not see, whatever the index returned.
pub fn admit_hits(hits: Vec<IndexHit>, filters: &QueryFilters, source: &'static str) -> Vec<IndexHit> {
	let total = hits.len();
	let admitted: Vec<IndexHit> =
		hits.into_iter().filter(|hit| filters.admits(&hit.metadata)).collect();

	if admitted.len() < total {
		tracing::warn!(
			source,
			dropped = total - admitted.len(),
			"Index returned hits outside the query filters."
		);
	}

	admitted
}

/// Reciprocal Rank Fusion of two ranked hit lists.
///
/// Each list contributes at most one `1 / (k + rank)` term per chunk (its first occurrence,
/// 1-based rank). Ordering is by fused score, then raw vector score (absent sorts last),
/// then chunk id, so equal inputs always give equal output.
pub fn fuse_rrf(vector: Vec<IndexHit>, keyword: Vec<IndexHit>, k: u32) -> Vec<Candidate> {
	let mut by_chunk: HashMap<String, Candidate> = HashMap::new();

	for (idx, hit) in vector.into_iter().enumerate() {
		let rank = idx as u32 + 1;
		let score = hit.score;
		let candidate =
			by_chunk.entry(hit.chunk_id.clone()).or_insert_with(|| Candidate::from_hit(hit));

		if candidate.vector_rank.is_some() {
			continue;
		}

		candidate.vector_rank = Some(rank);
		candidate.vector_score = Some(score);
		candidate.fused_score += rrf_term(k, rank);
	}
	for (idx, hit) in keyword.into_iter().enumerate() {
		let rank = idx as u32 + 1;
		let score = hit.score;
		let candidate =
			by_chunk.entry(hit.chunk_id.clone()).or_insert_with(|| Candidate::from_hit(hit));

		if candidate.keyword_rank.is_some() {
			continue;
		}

		candidate.keyword_rank = Some(rank);
		candidate.keyword_score = Some(score);
		candidate.fused_score += rrf_term(k, rank);
	}

	let mut fused: Vec<Candidate> = by_chunk.into_values().collect();

	fused.sort_by(cmp_fused);

	fused
}

pub fn rrf_term(k: u32, rank: u32) -> f32 {
	1.0 / (k as f32 + rank as f32)
}

pub(crate) fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

fn cmp_fused(a: &Candidate, b: &Candidate) -> Ordering {
	cmp_f32_desc(a.fused_score, b.fused_score)
		.then_with(|| match (a.vector_score, b.vector_score) {
			(Some(a), Some(b)) => cmp_f32_desc(a, b),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => Ordering::Equal,
		})
		.then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
