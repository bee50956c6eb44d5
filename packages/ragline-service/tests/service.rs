use std::time::Duration;

use time::OffsetDateTime;

use ragline_domain::{
	AnswerOutcome, Candidate, Degradation, DocumentUpdated, NOT_GROUNDED_MESSAGE, Scope,
	UNCITED_CONFIDENCE,
};
use ragline_service::{CacheTier, Error};
use ragline_testkit::{Doubles, chunk_hit, test_config};

const PTO_QUESTION: &str = "How much PTO do employees get?";
const ACCRUAL: &str = "Employees accrue 20 days of paid time off per year.";
const CARRY_OVER: &str = "Unused paid time off carries over until the end of March.";
const EXPENSES: &str = "Travel expense reimbursement requires manager approval.";

fn hr_scope() -> Scope {
	Scope::new(["hr"])
}

fn seed_handbook(doubles: &Doubles) {
	doubles.index.insert(chunk_hit("pto-1", "handbook", ACCRUAL, &["hr"]));
	doubles.index.insert(chunk_hit("pto-2", "handbook", CARRY_OVER, &["hr"]));
	doubles.index.insert(chunk_hit("exp-1", "expenses", EXPENSES, &["finance"]));
	doubles.rerank.set_score(ACCRUAL, 0.9);
	doubles.rerank.set_score(CARRY_OVER, 0.7);
	doubles.rerank.set_score(EXPENSES, 0.8);
}

fn ids(candidates: &[Candidate]) -> Vec<&str> {
	candidates.iter().map(|candidate| candidate.chunk_id.as_str()).collect()
}

#[tokio::test]
async fn repeated_question_is_served_from_cache() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);

	let service = doubles.service(test_config());
	let first = service.answer(PTO_QUESTION, &hr_scope()).await.expect("First answer failed.");
	let searches = doubles.index.search_calls();
	let second = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Second answer failed.");

	assert_eq!(first.outcome, AnswerOutcome::Generated);
	assert_eq!(second.outcome, AnswerOutcome::Cached);
	assert_eq!(second.answer, first.answer);
	assert_ne!(second.request_id, first.request_id);
	assert_eq!(doubles.index.search_calls(), searches);
	assert_eq!(doubles.generator.calls(), 1);
	assert_eq!(service.cache.inflight_len(), 0);
}

#[tokio::test]
async fn cached_retrieval_still_generates_a_fresh_answer() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);

	let service = doubles.service(test_config());

	service.answer(PTO_QUESTION, &hr_scope()).await.expect("First answer failed.");

	let searches = doubles.index.search_calls();
	let reranks = doubles.rerank.calls();
	let evicted = service.cache.invalidate(|entry| entry.tier() == CacheTier::Answer);
	let second = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Second answer failed.");

	assert_eq!(evicted, 1);
	assert_eq!(second.outcome, AnswerOutcome::Generated);
	assert!(second.grounded);
	assert_eq!(doubles.index.search_calls(), searches);
	assert_eq!(doubles.rerank.calls(), reranks);
	assert_eq!(doubles.generator.calls(), 2);
}

#[tokio::test]
async fn cached_embeddings_skip_the_embedding_provider() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);

	let service = doubles.service(test_config());

	service.answer(PTO_QUESTION, &hr_scope()).await.expect("First answer failed.");

	let searches = doubles.index.search_calls();
	let embeds = doubles.embedding.calls();

	service.cache.invalidate(|entry| entry.tier() != CacheTier::Embedding);

	let second = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Second answer failed.");

	assert_eq!(second.outcome, AnswerOutcome::Generated);
	assert!(doubles.index.search_calls() > searches);
	assert_eq!(doubles.embedding.calls(), embeds);
}

#[tokio::test]
async fn concurrent_identical_questions_generate_once() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.generator.set_delay(Duration::from_millis(20));

	let service = doubles.service(test_config());
	let scope = hr_scope();
	let (a, b, c, d) = tokio::join!(
		service.answer(PTO_QUESTION, &scope),
		service.answer(PTO_QUESTION, &scope),
		service.answer(PTO_QUESTION, &scope),
		service.answer(PTO_QUESTION, &scope),
	);
	let results = [a, b, c, d].map(|result| result.expect("Answer failed."));
	let generated =
		results.iter().filter(|result| result.outcome == AnswerOutcome::Generated).count();

	assert_eq!(doubles.generator.calls(), 1);
	assert_eq!(generated, 1);
	assert!(results.iter().all(|result| result.answer == results[0].answer));
	assert_eq!(service.cache.inflight_len(), 0);
}

#[tokio::test]
async fn off_topic_question_never_reaches_retrieval() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);

	let service = doubles.service(test_config());
	let result =
		service.answer("what is the weather today", &hr_scope()).await.expect("Answer failed.");

	assert_eq!(result.outcome, AnswerOutcome::OutOfScope);
	assert!(!result.grounded);
	assert!(result.citations.is_empty());
	assert_eq!(doubles.index.search_calls(), 0);
	assert_eq!(doubles.embedding.calls(), 0);
	assert_eq!(doubles.generator.calls(), 0);
}

#[tokio::test]
async fn overlap_between_paths_ranks_first() {
	let doubles = Doubles::new();
	let hit = |id: &str| chunk_hit(id, &format!("doc-{id}"), &format!("Policy text {id}."), &["hr"]);

	doubles.index.script_vector(vec![hit("A"), hit("B"), hit("C")]);
	doubles.index.script_keyword(vec![hit("B"), hit("C"), hit("D")]);

	let service = doubles.service(test_config());
	let query = service.normalizer.normalize("leave policy", &hr_scope());
	let fused = service.retrieve(&query).await.into_parts().expect("Retrieval failed.");

	assert_eq!(fused.1, None);
	assert_eq!(ids(&fused.0), vec!["B", "C", "A", "D"]);
	assert!((fused.0[0].fused_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
}

#[tokio::test]
async fn keyword_outage_degrades_to_vector_results() {
	let doubles = Doubles::new();

	for idx in 0..10 {
		let text = format!("Paid time off rule {idx} for employees in region {idx}.");

		doubles.index.insert(chunk_hit(&format!("v{idx}"), &format!("doc-{idx}"), &text, &["hr"]));
		doubles.rerank.set_score(&text, 0.9 - idx as f32 * 0.01);
	}

	doubles.index.fail_keyword(true);

	let service = doubles.service(test_config());
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert!(result.degraded);
	assert_eq!(result.degradations, vec![Degradation::KeywordSearchUnavailable]);
	assert!(result.grounded);
	assert!(!result.citations.is_empty());
	// One attempt plus two retries.
	assert_eq!(doubles.index.keyword_calls(), 3);
	assert!(result.citations.iter().all(|citation| citation.chunk_id.starts_with('v')));
}

#[tokio::test]
async fn both_paths_down_is_service_unavailable() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.index.fail_vector(true);
	doubles.index.fail_keyword(true);

	let service = doubles.service(test_config());
	let err = service.answer(PTO_QUESTION, &hr_scope()).await.expect_err("Expected a failure.");

	assert!(matches!(err, Error::ServiceUnavailable { .. }));
	assert_eq!(doubles.generator.calls(), 0);
}

#[tokio::test]
async fn near_duplicates_collapse_to_one_source() {
	let doubles = Doubles::new();
	let echo = "Employees accrue 20 days of paid time off per year!";

	doubles.index.insert(chunk_hit("pto-1", "handbook", ACCRUAL, &["hr"]));
	doubles.index.insert(chunk_hit("pto-1-copy", "handbook-copy", echo, &["hr"]));
	doubles.rerank.set_score(ACCRUAL, 0.9);
	doubles.rerank.set_score(echo, 0.8);
	doubles.generator.set_reply("Twenty days [Source 1] [Source 2].");

	let mut cfg = test_config();

	cfg.context.dedup_similarity_threshold = 0.90;

	let service = doubles.service(cfg);
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");
	let prompt = doubles.generator.last_prompt().expect("Expected a prompt.");

	assert!(prompt.contains("[Source 1] (document handbook)"));
	assert!(!prompt.contains("[Source 2]"));
	assert_eq!(result.citations.len(), 1);
	assert_eq!(result.citations[0].chunk_id, "pto-1");
}

#[tokio::test]
async fn nothing_above_floor_is_not_grounded() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.rerank.set_score(ACCRUAL, 0.49);
	doubles.rerank.set_score(CARRY_OVER, 0.2);

	let service = doubles.service(test_config());
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert_eq!(result.outcome, AnswerOutcome::NotGrounded);
	assert_eq!(result.answer, NOT_GROUNDED_MESSAGE);
	assert!(!result.grounded);
	assert_eq!(doubles.generator.calls(), 0);

	let again = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert_eq!(again.outcome, AnswerOutcome::NotGrounded);
}

#[tokio::test]
async fn chunks_outside_the_scope_never_reach_the_prompt() {
	let doubles = Doubles::new();

	doubles.index.insert(chunk_hit("exp-1", "expenses", EXPENSES, &["finance"]));
	doubles.rerank.set_score(EXPENSES, 0.95);
	doubles.index.ignore_filters(true);

	let service = doubles.service(test_config());
	let result = service
		.answer("What does travel expense reimbursement require?", &hr_scope())
		.await
		.expect("Answer failed.");

	assert_eq!(result.outcome, AnswerOutcome::NotGrounded);
	assert_eq!(doubles.generator.calls(), 0);

	let finance = service
		.answer("What does travel expense reimbursement require?", &Scope::new(["finance"]))
		.await
		.expect("Answer failed.");

	assert_eq!(finance.outcome, AnswerOutcome::Generated);
	assert_eq!(finance.citations[0].document_id, "expenses");
}

#[tokio::test]
async fn scopes_do_not_share_cached_answers() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.index.insert(chunk_hit("pto-eu", "handbook-eu", ACCRUAL, &["hr-eu"]));

	let service = doubles.service(test_config());
	let hr = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");
	let eu = service.answer(PTO_QUESTION, &Scope::new(["hr-eu"])).await.expect("Answer failed.");

	assert_eq!(hr.outcome, AnswerOutcome::Generated);
	assert_eq!(eu.outcome, AnswerOutcome::Generated);
	assert_eq!(eu.citations[0].document_id, "handbook-eu");
}

#[tokio::test]
async fn slow_generation_hits_the_deadline() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.generator.set_delay(Duration::from_secs(5));

	let mut cfg = test_config();

	cfg.service.request_deadline_ms = 50;

	let service = doubles.service(cfg);
	let err = service.answer(PTO_QUESTION, &hr_scope()).await.expect_err("Expected a timeout.");

	assert!(matches!(err, Error::Timeout { deadline_ms: 50 }));
	assert_eq!(service.cache.inflight_len(), 0);
}

#[tokio::test]
async fn generation_errors_and_empty_replies_fail_the_request() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.generator.fail(true);

	let service = doubles.service(test_config());
	let err = service.answer(PTO_QUESTION, &hr_scope()).await.expect_err("Expected a failure.");

	assert!(matches!(err, Error::GenerationFailed { .. }));
	assert_eq!(doubles.generator.calls(), 1);

	doubles.generator.fail(false);
	doubles.generator.set_reply("   ");

	let err = service.answer(PTO_QUESTION, &hr_scope()).await.expect_err("Expected a failure.");

	assert!(matches!(err, Error::GenerationFailed { .. }));
}

#[tokio::test]
async fn citations_follow_the_context_order() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.generator.set_reply("Twenty days [Source 2]. Carry-over [Source 1, 2]. [Source 9]");

	let service = doubles.service(test_config());
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");
	let cited: Vec<(u32, &str)> = result
		.citations
		.iter()
		.map(|citation| (citation.source_index, citation.chunk_id.as_str()))
		.collect();

	assert_eq!(cited, vec![(2, "pto-2"), (1, "pto-1")]);
	assert!((result.confidence - 0.8).abs() < 1e-6);
	assert!(!result.needs_review);
	assert!(result.grounded);

	let prompt = doubles.generator.last_prompt().expect("Expected a prompt.");

	assert!(prompt.ends_with(&format!("Question: {PTO_QUESTION}")));
}

#[tokio::test]
async fn uncited_answers_are_flagged_for_review() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);
	doubles.generator.set_reply("Employees get twenty days.");

	let service = doubles.service(test_config());
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert!(result.citations.is_empty());
	assert_eq!(result.confidence, UNCITED_CONFIDENCE);
	assert!(result.needs_review);
}

#[tokio::test]
async fn document_update_evicts_dependent_answers() {
	let doubles = Doubles::new();

	seed_handbook(&doubles);

	let service = doubles.service(test_config());

	service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	let removed = service.document_updated(&DocumentUpdated {
		document_id: "handbook".to_string(),
		chunk_hash: None,
		changed_at: OffsetDateTime::now_utc(),
	});

	assert!(removed >= 2);

	let after = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert_eq!(after.outcome, AnswerOutcome::Generated);
	assert_eq!(doubles.generator.calls(), 2);
}

#[tokio::test]
async fn invalid_scope_is_rejected_before_any_work() {
	let doubles = Doubles::new();
	let service = doubles.service(test_config());
	let err = service.answer(PTO_QUESTION, &Scope::default()).await.expect_err("Expected a failure.");

	assert!(matches!(err, Error::InvalidScope { .. }));
	assert_eq!(doubles.index.search_calls(), 0);

	let err = service.answer("   ", &hr_scope()).await.expect_err("Expected a failure.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn reranker_outage_falls_back_to_fused_scores() {
	let doubles = Doubles::new();

	doubles.index.insert(chunk_hit("pto-1", "handbook", ACCRUAL, &["hr"]));
	doubles.rerank.fail(true);

	let service = doubles.service(test_config());
	let result = service.answer(PTO_QUESTION, &hr_scope()).await.expect("Answer failed.");

	assert!(result.degraded);
	assert_eq!(result.degradations, vec![Degradation::RerankerUnavailable]);
	assert_eq!(result.citations.len(), 1);
	assert!((result.citations[0].relevance - 1.0).abs() < 1e-6);
	assert_eq!(doubles.rerank.calls(), 3);
}

#[tokio::test]
async fn over_budget_candidates_are_summarized_past_the_head() {
	let doubles = Doubles::new();
	let mut cfg = test_config();

	cfg.context.token_budget = 20;
	cfg.context.uncompressed_head = 1;

	let service = doubles.service(cfg);
	let query = service.normalizer.normalize("paid time off rules", &hr_scope());
	let long_text = "Paid time off accrues monthly at a fixed rate for every employee. \
		Requests must be filed two weeks ahead. Managers approve within three days.";
	let candidates: Vec<Candidate> = [("head", "Paid time off is twenty days."), ("tail", long_text)]
		.into_iter()
		.map(|(id, text)| {
			let mut candidate = Candidate::from_hit(chunk_hit(id, "handbook", text, &["hr"]));

			candidate.rerank_score = Some(if id == "head" { 0.9 } else { 0.8 });

			candidate
		})
		.collect();
	let (context, degradation) = service.process(&query, candidates.clone(), 20).await;

	assert_eq!(degradation, None);
	assert_eq!(ids(&context.candidates), vec!["head", "tail"]);
	assert!(!context.candidates[0].compressed);
	assert!(context.candidates[1].compressed);
	assert!(context.total_tokens <= 20);
	assert_eq!(doubles.summarizer.calls(), 1);

	doubles.summarizer.fail(true);

	let (context, degradation) = service.process(&query, candidates, 20).await;

	assert_eq!(degradation, Some(Degradation::SummarizerUnavailable));
	assert!(context.total_tokens <= 20);
	assert!(context.candidates.iter().skip(1).all(|candidate| candidate.text.ends_with('.')));
}
