use std::collections::{BTreeMap, HashSet};

use time::Date;

use ragline_domain::{Candidate, Degradation, Query, RankedContext, VersionRole};
use ragline_tokens::fit_sentences;

use crate::{RaglineService, Result, limits, retrieve::cmp_f32_desc, retry};

impl RaglineService {
	/// Turns reranked candidates into the context handed to prompt assembly.
	///
	/// Runs the relevance floor, near-duplicate removal, MMR selection, version resolution,
	/// and compression, in that order. The returned context always fits `token_budget`; it may
	/// be empty.
	pub async fn process(
		&self,
		query: &Query,
		candidates: Vec<Candidate>,
		token_budget: u32,
	) -> (RankedContext, Option<Degradation>) {
		let cfg = &self.cfg.context;
		let received = candidates.len();
		let candidates = apply_relevance_floor(candidates, cfg.relevance_floor);
		let above_floor = candidates.len();
		let candidates = drop_near_duplicates(candidates, cfg.dedup_similarity_threshold);
		let unique = candidates.len();
		let candidates = select_mmr(candidates, cfg.top_k, cfg.mmr_lambda);
		let candidates = resolve_versions(candidates, query.retains_history());
		let (candidates, degradation) = self.compress(candidates, token_budget).await;

		tracing::debug!(
			received,
			above_floor,
			unique,
			kept = candidates.len(),
			token_budget,
			"Post-processed candidates."
		);

		(RankedContext::new(candidates, token_budget), degradation)
	}

	async fn compress(
		&self,
		candidates: Vec<Candidate>,
		token_budget: u32,
	) -> (Vec<Candidate>, Option<Degradation>) {
		let head = self.cfg.context.uncompressed_head as usize;
		let mut kept = Vec::with_capacity(candidates.len());
		let mut total = 0_u32;
		let mut degradation = None;

		for (idx, mut candidate) in candidates.into_iter().enumerate() {
			let tokens = self.tokens.count(&candidate.text);

			if total.saturating_add(tokens) <= token_budget {
				candidate.token_count = tokens;
				total += tokens;

				kept.push(candidate);

				continue;
			}

			let remaining = token_budget - total;

			if idx < head || remaining == 0 {
				tracing::debug!(chunk_id = %candidate.chunk_id, tokens, remaining, "Dropping candidate over budget.");

				continue;
			}

			let mut summary = match self.summarize_chunk(&candidate.text, remaining).await {
				Ok(summary) => summary,
				Err(err) => {
					tracing::warn!(
						error = %err,
						chunk_id = %candidate.chunk_id,
						"Summarizer unavailable. Truncating to whole sentences."
					);

					degradation = Some(Degradation::SummarizerUnavailable);

					fit_sentences(&candidate.text, remaining, self.tokens.as_ref())
				},
			};
			let mut summary_tokens = self.tokens.count(&summary);

			if summary_tokens > remaining {
				summary = fit_sentences(&summary, remaining, self.tokens.as_ref());
				summary_tokens = self.tokens.count(&summary);
			}
			if summary.trim().is_empty() || summary_tokens > remaining {
				tracing::debug!(chunk_id = %candidate.chunk_id, remaining, "Dropping candidate that does not compress into budget.");

				continue;
			}

			candidate.text = summary;
			candidate.token_count = summary_tokens;
			candidate.compressed = true;
			total += summary_tokens;

			kept.push(candidate);
		}

		(kept, degradation)
	}

	async fn summarize_chunk(&self, text: &str, target_tokens: u32) -> Result<String> {
		let target_tokens = target_tokens.max(1);

		retry::with_retries(self.retry_policy(), "summarize", || async move {
			let _permit = limits::acquire(&self.limits.summarizer, "summarizer").await?;

			self.collaborators
				.summarizer
				.summarize(&self.cfg.providers.summarizer, text, target_tokens)
				.await
		})
		.await
	}
}

pub fn apply_relevance_floor(candidates: Vec<Candidate>, floor: f32) -> Vec<Candidate> {
	candidates.into_iter().filter(|candidate| candidate.relevance() >= floor).collect()
}

/// Drops every candidate whose embedding is closer than `threshold` to a more relevant one.
///
/// Equal relevance keeps the earlier candidate. Candidates without embeddings are never
/// considered duplicates.
pub fn drop_near_duplicates(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
	candidates.sort_by(|a, b| cmp_f32_desc(a.relevance(), b.relevance()));

	let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());

	for candidate in candidates {
		let duplicate_of = kept.iter().find(|existing| {
			similarity(&candidate, existing).map(|value| value > threshold).unwrap_or(false)
		});

		if let Some(existing) = duplicate_of {
			tracing::debug!(
				chunk_id = %candidate.chunk_id,
				kept_chunk_id = %existing.chunk_id,
				"Dropping near-duplicate candidate."
			);

			continue;
		}

		kept.push(candidate);
	}

	kept
}

/// Greedy maximal marginal relevance selection of up to `top_k` candidates.
///
/// Each step picks the candidate maximizing `lambda * relevance - (1 - lambda) * max_sim`,
/// where `max_sim` is the highest cosine similarity to anything already selected. Ties go to
/// the candidate that came first.
pub fn select_mmr(candidates: Vec<Candidate>, top_k: u32, lambda: f32) -> Vec<Candidate> {
	let top_k = top_k as usize;

	if candidates.len() <= 1 || top_k == 0 {
		return candidates.into_iter().take(top_k).collect();
	}

	let mut remaining: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
	let mut selected: Vec<Candidate> = Vec::with_capacity(top_k.min(remaining.len()));

	while selected.len() < top_k {
		let mut best: Option<(usize, f32)> = None;

		for (pos, slot) in remaining.iter().enumerate() {
			let Some(candidate) = slot else { continue };
			let max_sim = selected
				.iter()
				.filter_map(|picked| similarity(candidate, picked))
				.fold(None, |acc: Option<f32>, value| Some(acc.map_or(value, |acc| acc.max(value))))
				.unwrap_or(0.0);
			let score = lambda * candidate.relevance() - (1.0 - lambda) * max_sim;

			if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
				best = Some((pos, score));
			}
		}

		let Some((pos, _)) = best else { break };
		let Some(picked) = remaining[pos].take() else { break };

		selected.push(picked);
	}

	selected
}

/// Collapses versions of the same document family.
///
/// Within a family, members carrying the newest effective date are the current version;
/// undated members count as older than any dated one. Without `retain_history` older
/// versions are dropped. With it they stay, tagged `Superseded`, and the current version is
/// moved ahead of them inside the slots the family already occupies.
pub fn resolve_versions(candidates: Vec<Candidate>, retain_history: bool) -> Vec<Candidate> {
	let mut newest: BTreeMap<String, Option<Date>> = BTreeMap::new();
	let mut versions: BTreeMap<String, HashSet<Option<Date>>> = BTreeMap::new();

	for candidate in &candidates {
		let Some(family) = candidate.metadata.document_family.as_ref() else { continue };
		let date = candidate.metadata.effective_date;
		let entry = newest.entry(family.clone()).or_insert(date);

		if date > *entry {
			*entry = date;
		}

		versions.entry(family.clone()).or_default().insert(date);
	}

	let role_of = |candidate: &Candidate| -> Option<VersionRole> {
		let family = candidate.metadata.document_family.as_ref()?;

		if versions.get(family).map(|dates| dates.len() < 2).unwrap_or(true) {
			return None;
		}

		if newest.get(family) == Some(&candidate.metadata.effective_date) {
			Some(VersionRole::Current)
		} else {
			Some(VersionRole::Superseded)
		}
	};

	if !retain_history {
		return candidates
			.into_iter()
			.filter(|candidate| {
				let superseded = role_of(candidate) == Some(VersionRole::Superseded);

				if superseded {
					tracing::debug!(chunk_id = %candidate.chunk_id, "Dropping superseded version.");
				}

				!superseded
			})
			.collect();
	}

	let mut out: Vec<Candidate> = candidates
		.into_iter()
		.map(|mut candidate| {
			candidate.version_role = role_of(&candidate);

			candidate
		})
		.collect();

	for family in versions.keys() {
		let slots: Vec<usize> = out
			.iter()
			.enumerate()
			.filter(|(_, candidate)| {
				candidate.version_role.is_some()
					&& candidate.metadata.document_family.as_ref() == Some(family)
			})
			.map(|(idx, _)| idx)
			.collect();

		if slots.is_empty() {
			continue;
		}

		let mut members: Vec<Candidate> = slots.iter().map(|idx| out[*idx].clone()).collect();

		// Stable: keeps rank order inside each role.
		members.sort_by_key(|candidate| candidate.version_role != Some(VersionRole::Current));

		for (idx, member) in slots.into_iter().zip(members) {
			out[idx] = member;
		}
	}

	out
}

/// Cosine similarity in `[-1, 1]`, or `None` for missing, empty, zero, or mismatched vectors.
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Option<f32> {
	if lhs.is_empty() || lhs.len() != rhs.len() {
		return None;
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return None;
	}

	Some((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

fn similarity(a: &Candidate, b: &Candidate) -> Option<f32> {
	cosine_similarity(a.embedding.as_deref()?, b.embedding.as_deref()?)
}

#[cfg(test)]
mod tests {
	use time::macros::date;

	use ragline_domain::{ChunkMetadata, IndexHit};

	use super::*;

	fn candidate(chunk_id: &str, relevance: f32, embedding: Option<Vec<f32>>) -> Candidate {
		let mut candidate = Candidate::from_hit(IndexHit {
			chunk_id: chunk_id.to_string(),
			document_id: format!("doc-{chunk_id}"),
			text: format!("Text of {chunk_id}."),
			score: 0.0,
			metadata: ChunkMetadata::default(),
		});

		candidate.rerank_score = Some(relevance);
		candidate.embedding = embedding;

		candidate
	}

	fn versioned(chunk_id: &str, relevance: f32, family: &str, effective: Date) -> Candidate {
		let mut candidate = candidate(chunk_id, relevance, None);

		candidate.metadata.document_family = Some(family.to_string());
		candidate.metadata.effective_date = Some(effective);

		candidate
	}

	fn ids(candidates: &[Candidate]) -> Vec<&str> {
		candidates.iter().map(|candidate| candidate.chunk_id.as_str()).collect()
	}

	#[test]
	fn relevance_floor_is_inclusive() {
		let kept = apply_relevance_floor(
			vec![candidate("a", 0.9, None), candidate("b", 0.5, None), candidate("c", 0.49, None)],
			0.5,
		);

		assert_eq!(ids(&kept), vec!["a", "b"]);
	}

	#[test]
	fn near_duplicates_keep_the_more_relevant() {
		let kept = drop_near_duplicates(
			vec![
				candidate("low", 0.6, Some(vec![1.0, 0.0, 0.01])),
				candidate("high", 0.9, Some(vec![1.0, 0.0, 0.0])),
				candidate("other", 0.7, Some(vec![0.0, 1.0, 0.0])),
				candidate("bare", 0.8, None),
			],
			0.85,
		);

		assert_eq!(ids(&kept), vec!["high", "bare", "other"]);
	}

	#[test]
	fn default_threshold_drops_the_weaker_near_duplicate() {
		let threshold = ragline_config::Context::default().dedup_similarity_threshold;
		let near = vec![0.9, (1.0_f32 - 0.81).sqrt()];
		let similarity =
			cosine_similarity(&[1.0, 0.0], &near).expect("Expected matching dimensions.");

		assert!((similarity - 0.90).abs() < 1e-4);

		let kept = drop_near_duplicates(
			vec![
				candidate("weaker", 0.6, Some(near)),
				candidate("stronger", 0.8, Some(vec![1.0, 0.0])),
			],
			threshold,
		);

		assert_eq!(ids(&kept), vec!["stronger"]);
	}

	#[test]
	fn near_duplicate_ties_drop_the_later() {
		let kept = drop_near_duplicates(
			vec![
				candidate("first", 0.8, Some(vec![1.0, 0.0])),
				candidate("second", 0.8, Some(vec![1.0, 0.0])),
			],
			0.85,
		);

		assert_eq!(ids(&kept), vec!["first"]);
	}

	#[test]
	fn mmr_prefers_diverse_candidates() {
		let selected = select_mmr(
			vec![
				candidate("a", 0.95, Some(vec![1.0, 0.0])),
				candidate("a2", 0.94, Some(vec![0.99, 0.1])),
				candidate("b", 0.80, Some(vec![0.0, 1.0])),
			],
			2,
			0.7,
		);

		assert_eq!(ids(&selected), vec!["a", "b"]);
	}

	#[test]
	fn mmr_without_embeddings_follows_relevance() {
		let selected = select_mmr(
			vec![candidate("a", 0.9, None), candidate("b", 0.8, None), candidate("c", 0.7, None)],
			2,
			0.7,
		);

		assert_eq!(ids(&selected), vec!["a", "b"]);
	}

	#[test]
	fn versions_keep_only_the_newest_by_default() {
		let resolved = resolve_versions(
			vec![
				versioned("old", 0.9, "leave-policy", date!(2022 - 01 - 01)),
				candidate("unrelated", 0.8, None),
				versioned("new", 0.7, "leave-policy", date!(2024 - 01 - 01)),
			],
			false,
		);

		assert_eq!(ids(&resolved), vec!["unrelated", "new"]);
		assert!(resolved.iter().all(|candidate| candidate.version_role.is_none()));
	}

	#[test]
	fn history_keeps_versions_with_current_first() {
		let resolved = resolve_versions(
			vec![
				versioned("old", 0.9, "leave-policy", date!(2022 - 01 - 01)),
				candidate("unrelated", 0.8, None),
				versioned("new", 0.7, "leave-policy", date!(2024 - 01 - 01)),
			],
			true,
		);

		assert_eq!(ids(&resolved), vec!["new", "unrelated", "old"]);
		assert_eq!(resolved[0].version_role, Some(VersionRole::Current));
		assert_eq!(resolved[1].version_role, None);
		assert_eq!(resolved[2].version_role, Some(VersionRole::Superseded));
	}

	#[test]
	fn single_version_families_are_untouched() {
		let resolved = resolve_versions(
			vec![
				versioned("p1", 0.9, "handbook", date!(2024 - 01 - 01)),
				versioned("p2", 0.8, "handbook", date!(2024 - 01 - 01)),
			],
			true,
		);

		assert_eq!(ids(&resolved), vec!["p1", "p2"]);
		assert!(resolved.iter().all(|candidate| candidate.version_role.is_none()));
	}

	#[test]
	fn cosine_rejects_mismatched_vectors() {
		assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
		assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
		assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]).unwrap_or_default() - 1.0).abs() < 1e-6);
	}
}
