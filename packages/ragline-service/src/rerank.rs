use std::cmp::Ordering;

use futures::future;

use ragline_domain::{Candidate, Degradation, Query};

use crate::{
	CacheKey, CacheValue, ChunkSource, Error, RaglineService, Result, StageOutcome, limits,
	retrieve::cmp_f32_desc, retry,
};

impl RaglineService {
	/// Scores the first `rerank_depth` fused candidates and sorts them by rerank score.
	///
	/// Candidates past the depth are dropped. When any batch fails after retries, every
	/// candidate falls back to its fused score rescaled to `[0, 1]`, and the outcome is
	/// `Degraded`. Retrieval scores are never modified.
	pub async fn rerank(
		&self,
		query: &Query,
		mut candidates: Vec<Candidate>,
	) -> StageOutcome<Vec<Candidate>> {
		candidates.truncate(self.cfg.retrieval.rerank_depth as usize);

		if candidates.is_empty() {
			return StageOutcome::Ok(candidates);
		}

		match self.score_candidates(query, &candidates).await {
			Ok(scores) => {
				for (candidate, score) in candidates.iter_mut().zip(scores) {
					candidate.rerank_score = Some(sanitize_score(score));
				}

				candidates.sort_by(cmp_reranked);

				StageOutcome::Ok(candidates)
			},
			Err(err) => {
				tracing::warn!(
					error = %err,
					candidates = candidates.len(),
					"Reranker unavailable. Falling back to fused scores."
				);

				apply_fused_fallback(&mut candidates, self.cfg.retrieval.fusion_k);
				candidates.sort_by(cmp_reranked);

				StageOutcome::Degraded(candidates, Degradation::RerankerUnavailable)
			},
		}
	}

	/// Attaches chunk embeddings for similarity checks during post-processing.
	///
	/// Cached vectors are reused; the rest are embedded in one batched call. On failure the
	/// missing embeddings stay empty and the degradation is returned.
	pub async fn attach_embeddings(&self, candidates: &mut [Candidate]) -> Option<Degradation> {
		let model = self.embedding_model();
		let mut missing = Vec::new();

		for (idx, candidate) in candidates.iter_mut().enumerate() {
			if candidate.embedding.is_some() {
				continue;
			}

			let key = CacheKey::chunk_embedding(&candidate.document_id, &candidate.chunk_hash, &model);

			match self.cache.lookup_embedding(&key) {
				Some(vector) => candidate.embedding = Some(vector),
				None => missing.push(idx),
			}
		}

		if missing.is_empty() {
			return None;
		}

		let texts: Vec<String> = missing.iter().map(|idx| candidates[*idx].text.clone()).collect();
		let texts = texts.as_slice();
		let embedded = retry::with_retries(self.retry_policy(), "embed_chunks", || async move {
			let _permit = limits::acquire(&self.limits.embedding, "embedding").await?;

			self.collaborators.embedding.embed(&self.cfg.providers.embedding, texts).await
		})
		.await;
		let vectors = match embedded {
			Ok(vectors) if vectors.len() == missing.len() => vectors,
			Ok(vectors) => {
				tracing::warn!(
					expected = missing.len(),
					received = vectors.len(),
					"Embedding provider returned the wrong number of vectors."
				);

				return Some(Degradation::EmbeddingsUnavailable);
			},
			Err(err) => {
				tracing::warn!(error = %err, "Chunk embeddings unavailable. Similarity checks are skipped.");

				return Some(Degradation::EmbeddingsUnavailable);
			},
		};

		for (idx, vector) in missing.into_iter().zip(vectors) {
			let candidate = &mut candidates[idx];
			let key = CacheKey::chunk_embedding(&candidate.document_id, &candidate.chunk_hash, &model);

			self.cache.store_default(key, CacheValue::Embedding {
				vector: vector.clone(),
				source: Some(ChunkSource {
					document_id: candidate.document_id.clone(),
					chunk_hash: candidate.chunk_hash.clone(),
				}),
			});

			candidate.embedding = Some(vector);
		}

		None
	}

	async fn score_candidates(&self, query: &Query, candidates: &[Candidate]) -> Result<Vec<f32>> {
		let batch_size = (self.cfg.rerank.batch_size as usize).max(1);
		let batches: Vec<Vec<String>> = candidates
			.chunks(batch_size)
			.map(|batch| batch.iter().map(|candidate| candidate.text.clone()).collect())
			.collect();
		let query_text = query.normalized.as_str();
		let scored = future::try_join_all(
			batches.iter().map(|docs| self.score_batch(query_text, docs.as_slice())),
		)
		.await?;

		Ok(scored.into_iter().flatten().collect())
	}

	async fn score_batch(&self, query_text: &str, docs: &[String]) -> Result<Vec<f32>> {
		let scores = retry::with_retries(self.retry_policy(), "rerank", || async move {
			let _permit = limits::acquire(&self.limits.rerank, "rerank").await?;

			self.collaborators.rerank.rerank(&self.cfg.providers.rerank, query_text, docs).await
		})
		.await?;

		if scores.len() != docs.len() {
			return Err(Error::Provider {
				message: format!("reranker scored {} of {} documents", scores.len(), docs.len()),
			});
		}

		Ok(scores)
	}
}

/// Rescales fused scores so a chunk ranked first in both lists scores 1.0.
///
/// Keeps the fused ordering and puts the fallback on the same `[0, 1]` scale the relevance
/// floor expects.
pub fn apply_fused_fallback(candidates: &mut [Candidate], fusion_k: u32) {
	let best_possible = 2.0 / (fusion_k as f32 + 1.0);

	for candidate in candidates {
		candidate.rerank_score = Some(sanitize_score(candidate.fused_score / best_possible));
	}
}

fn sanitize_score(score: f32) -> f32 {
	if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

fn cmp_reranked(a: &Candidate, b: &Candidate) -> Ordering {
	cmp_f32_desc(a.relevance(), b.relevance())
		.then_with(|| cmp_f32_desc(a.fused_score, b.fused_score))
		.then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
