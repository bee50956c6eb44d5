use std::time::Duration;

use uuid::Uuid;

use ragline_domain::{
	AnswerOutcome, AnswerResult, Candidate, Citation, Degradation, DocumentUpdated, Intent,
	NOT_GROUNDED_MESSAGE, Query, RankedContext, Scope, UNCITED_CONFIDENCE, VersionRole,
};

use crate::{CacheKey, CacheTier, CacheValue, Error, RaglineService, Result, limits};

const SYSTEM_INSTRUCTION: &str = "You answer questions using only the numbered sources below. \
Cite every claim with its source label, for example [Source 1] or [Source 1, 2]. \
When sources are marked current and superseded, prefer the current one unless the question \
asks about history.";

const CITATION_MARKER: &str = "[Source";

/// Where one answer request currently is. Transitions are logged at debug level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
	Received,
	Normalized,
	CacheChecked,
	Retrieved,
	Reranked,
	PostProcessed,
	PromptBuilt,
	Generated,
	CitationsAssembled,
	CacheStored,
	Done,
	NotGrounded,
	Failed,
}
impl Stage {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Received => "received",
			Self::Normalized => "normalized",
			Self::CacheChecked => "cache_checked",
			Self::Retrieved => "retrieved",
			Self::Reranked => "reranked",
			Self::PostProcessed => "post_processed",
			Self::PromptBuilt => "prompt_built",
			Self::Generated => "generated",
			Self::CitationsAssembled => "citations_assembled",
			Self::CacheStored => "cache_stored",
			Self::Done => "done",
			Self::NotGrounded => "not_grounded",
			Self::Failed => "failed",
		}
	}
}

struct StageTracker {
	request_id: Uuid,
	stage: Stage,
}
impl StageTracker {
	fn new(request_id: Uuid) -> Self {
		tracing::debug!(%request_id, stage = Stage::Received.as_str(), "Answer request received.");

		Self { request_id, stage: Stage::Received }
	}

	fn advance(&mut self, next: Stage) {
		tracing::debug!(
			request_id = %self.request_id,
			from = self.stage.as_str(),
			stage = next.as_str(),
			"Answer stage transition."
		);

		self.stage = next;
	}
}

impl RaglineService {
	/// Answers `raw_query` for a caller bounded by `scope`.
	///
	/// The whole request runs under `service.request_deadline_ms`; on expiry in-flight calls
	/// are dropped and [`Error::Timeout`] is returned.
	pub async fn answer(&self, raw_query: &str, scope: &Scope) -> Result<AnswerResult> {
		scope.validate()?;

		if raw_query.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty".to_string() });
		}

		let request_id = Uuid::new_v4();
		let deadline_ms = self.cfg.service.request_deadline_ms;
		let deadline = Duration::from_millis(deadline_ms);
		let result =
			match tokio::time::timeout(deadline, self.run_answer(request_id, raw_query, scope)).await
			{
				Ok(result) => result,
				Err(_) => Err(Error::Timeout { deadline_ms }),
			};

		match &result {
			Ok(answer) => tracing::info!(
				%request_id,
				outcome = ?answer.outcome,
				grounded = answer.grounded,
				degraded = answer.degraded,
				citations = answer.citations.len(),
				"Answer request finished."
			),
			Err(err) => tracing::warn!(
				%request_id,
				stage = Stage::Failed.as_str(),
				error = %err,
				"Answer request failed."
			),
		}

		result
	}

	/// Drops cache entries that depend on the updated document. Returns how many went.
	pub fn document_updated(&self, event: &DocumentUpdated) -> usize {
		self.cache.invalidate_document(event)
	}

	async fn run_answer(
		&self,
		request_id: Uuid,
		raw_query: &str,
		scope: &Scope,
	) -> Result<AnswerResult> {
		let mut tracker = StageTracker::new(request_id);
		let query = self.normalizer.normalize(raw_query, scope);

		tracker.advance(Stage::Normalized);

		if query.intent == Intent::OffTopic
			&& query.intent_confidence >= self.cfg.normalizer.off_topic_threshold
		{
			tracing::info!(
				%request_id,
				confidence = query.intent_confidence,
				"Query classified off-topic. Skipping retrieval."
			);
			tracker.advance(Stage::Done);

			return Ok(AnswerResult::out_of_scope(request_id));
		}

		let key = CacheKey::derive(&query.normalized, &query.filters, &query.filters.acl_groups);

		if let Some(cached) = self.cached_answer(&key, request_id) {
			tracker.advance(Stage::CacheChecked);
			tracker.advance(Stage::Done);

			return Ok(cached);
		}

		let query = &query;
		let key_ref = &key;
		let tracker = &mut tracker;

		self.cache
			.singleflight(&key, || async move {
				// A caller that waited may find the answer already stored.
				let cached = self.cached_answer(key_ref, request_id);

				tracker.advance(Stage::CacheChecked);

				if let Some(cached) = cached {
					tracker.advance(Stage::Done);

					return Ok(cached);
				}

				self.answer_uncached(request_id, query, key_ref, tracker).await
			})
			.await
	}

	async fn answer_uncached(
		&self,
		request_id: Uuid,
		query: &Query,
		key: &CacheKey,
		tracker: &mut StageTracker,
	) -> Result<AnswerResult> {
		let mut degradations = Vec::new();
		let mut candidates = match self.cache.lookup_retrieval(key) {
			Some(candidates) => {
				tracing::debug!(%request_id, candidates = candidates.len(), "Reusing cached retrieval.");
				tracker.advance(Stage::Retrieved);
				tracker.advance(Stage::Reranked);

				candidates
			},
			None => self.retrieve_and_rerank(query, key, tracker, &mut degradations).await?,
		};

		if let Some(degradation) = self.attach_embeddings(&mut candidates).await {
			degradations.push(degradation);
		}

		let (context, degradation) =
			self.process(query, candidates, self.cfg.context.token_budget).await;

		degradations.extend(degradation);
		tracker.advance(Stage::PostProcessed);

		if context.is_empty() {
			tracker.advance(Stage::NotGrounded);

			return Ok(AnswerResult::not_grounded(request_id, degradations));
		}

		let prompt = build_prompt(&query.raw, &context);

		tracker.advance(Stage::PromptBuilt);

		let text = self.generate_text(&prompt).await?;

		tracker.advance(Stage::Generated);

		let citations = assemble_citations(&parse_citations(&text), &context);
		let (confidence, needs_review) = score_confidence(&citations);

		tracker.advance(Stage::CitationsAssembled);

		let result = AnswerResult {
			request_id,
			answer: text.trim().to_string(),
			citations,
			confidence,
			grounded: true,
			degraded: !degradations.is_empty(),
			degradations,
			needs_review,
			outcome: AnswerOutcome::Generated,
			created_at: time::OffsetDateTime::now_utc(),
		};

		if result.grounded && !result.degraded {
			let document_ids = context_documents(&context);

			self.cache.store_default(key.clone(), CacheValue::Answer {
				result: Box::new(result.clone()),
				document_ids,
			});
			tracker.advance(Stage::CacheStored);
		}

		tracker.advance(Stage::Done);

		Ok(result)
	}

	async fn retrieve_and_rerank(
		&self,
		query: &Query,
		key: &CacheKey,
		tracker: &mut StageTracker,
		degradations: &mut Vec<Degradation>,
	) -> Result<Vec<Candidate>> {
		let (fused, degradation) = self
			.retrieve(query)
			.await
			.into_parts()
			.map_err(|err| Error::ServiceUnavailable { message: err.to_string() })?;

		degradations.extend(degradation);
		tracker.advance(Stage::Retrieved);

		let (reranked, degradation) = self.rerank(query, fused).await.into_parts()?;

		degradations.extend(degradation);
		tracker.advance(Stage::Reranked);

		if degradations.is_empty() {
			self.cache.store_default(key.clone(), CacheValue::Retrieval(reranked.clone()));
		}

		Ok(reranked)
	}

	async fn generate_text(&self, prompt: &str) -> Result<String> {
		let generated = {
			let _permit = limits::acquire(&self.limits.generation, "generation").await?;

			self.collaborators.generation.generate(&self.cfg.providers.generation, prompt).await
		};
		let text = generated.map_err(|err| Error::GenerationFailed { message: err.to_string() })?;

		if text.trim().is_empty() {
			return Err(Error::GenerationFailed {
				message: "generator returned an empty answer".to_string(),
			});
		}

		Ok(text)
	}

	fn cached_answer(&self, key: &CacheKey, request_id: Uuid) -> Option<AnswerResult> {
		if !self.cache.is_enabled() {
			return None;
		}

		let mut result = self.cache.lookup_answer(key)?;

		tracing::debug!(%request_id, tier = CacheTier::Answer.as_str(), "Serving cached answer.");

		result.request_id = request_id;
		result.outcome = AnswerOutcome::Cached;

		Some(result)
	}
}

/// Instruction that opens every prompt. An unsupported question must be declined with the
/// same wording a not-grounded result carries.
pub fn system_instruction() -> String {
	format!(
		"{SYSTEM_INSTRUCTION} If the sources do not support an answer, say \"{NOT_GROUNDED_MESSAGE}\""
	)
}

/// Prompt sent to the generator: instruction, numbered sources, then the caller's own words.
pub fn build_prompt(raw_query: &str, context: &RankedContext) -> String {
	let mut prompt = system_instruction();

	prompt.push_str("\n\n");

	for (idx, candidate) in context.candidates.iter().enumerate() {
		prompt.push_str(&format!("[Source {}] ({})\n", idx + 1, source_header(candidate)));
		prompt.push_str(candidate.text.trim());
		prompt.push_str("\n\n");
	}

	prompt.push_str("Question: ");
	prompt.push_str(raw_query.trim());

	prompt
}

/// `document <id>[, page p][, effective <date>][, current|superseded]`
fn source_header(candidate: &Candidate) -> String {
	let mut header = format!("document {}", candidate.document_id);

	if let Some(page) = candidate.metadata.page {
		header.push_str(&format!(", page {page}"));
	}
	if let Some(role) = candidate.version_role {
		if let Some(date) = candidate.metadata.effective_date {
			header.push_str(&format!(", effective {date}"));
		}

		header.push_str(match role {
			VersionRole::Current => ", current",
			VersionRole::Superseded => ", superseded",
		});
	}

	header
}

/// Source numbers cited in `text`, in first-appearance order, without duplicates.
///
/// Recognizes `[Source N]` and `[Source N, M, ...]`. Brackets that do not hold a clean list
/// of numbers are ignored.
pub fn parse_citations(text: &str) -> Vec<u32> {
	let mut out = Vec::new();
	let mut rest = text;

	while let Some(start) = rest.find(CITATION_MARKER) {
		let after = &rest[start + CITATION_MARKER.len()..];
		let Some(end) = after.find(']') else { break };
		let body = &after[..end];
		let numbers: Option<Vec<u32>> =
			body.split(',').map(|part| part.trim().parse::<u32>().ok()).collect();

		match numbers {
			Some(numbers) if body.starts_with(char::is_whitespace) => {
				for number in numbers {
					if !out.contains(&number) {
						out.push(number);
					}
				}

				rest = &after[end + 1..];
			},
			_ => rest = after,
		}
	}

	out
}

/// Maps cited source numbers onto the context. Numbers outside it are logged and dropped.
pub fn assemble_citations(indices: &[u32], context: &RankedContext) -> Vec<Citation> {
	let mut out = Vec::with_capacity(indices.len());

	for index in indices {
		let Some(candidate) = context.source(*index as usize) else {
			tracing::warn!(
				source_index = index,
				sources = context.len(),
				"Answer cites a source that is not in the context."
			);

			continue;
		};

		out.push(Citation {
			source_index: *index,
			chunk_id: candidate.chunk_id.clone(),
			document_id: candidate.document_id.clone(),
			page: candidate.metadata.page,
			section: candidate.metadata.section.clone(),
			relevance: candidate.relevance(),
		});
	}

	out
}

/// Mean relevance of the cited sources. An answer citing nothing is flagged for review.
pub fn score_confidence(citations: &[Citation]) -> (f32, bool) {
	if citations.is_empty() {
		return (UNCITED_CONFIDENCE, true);
	}

	let sum: f32 = citations.iter().map(|citation| citation.relevance).sum();

	((sum / citations.len() as f32).clamp(0.0, 1.0), false)
}

fn context_documents(context: &RankedContext) -> Vec<String> {
	let mut out: Vec<String> =
		context.candidates.iter().map(|candidate| candidate.document_id.clone()).collect();

	out.sort();
	out.dedup();

	out
}
