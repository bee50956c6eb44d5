use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub const NOT_GROUNDED_MESSAGE: &str = "I don't have information about that.";
pub const OUT_OF_SCOPE_MESSAGE: &str =
	"That question is outside what I can answer from the knowledge base.";
/// Confidence reported when the answer cites nothing despite a non-empty context.
pub const UNCITED_CONFIDENCE: f32 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
	/// The `N` of the `[Source N]` label in the answer text.
	pub source_index: u32,
	pub chunk_id: String,
	pub document_id: String,
	pub page: Option<u32>,
	pub section: Option<String>,
	pub relevance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
	Generated,
	Cached,
	NotGrounded,
	OutOfScope,
}

/// Non-fatal collaborator failures that reduced the signal behind an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
	VectorSearchUnavailable,
	KeywordSearchUnavailable,
	RerankerUnavailable,
	EmbeddingsUnavailable,
	SummarizerUnavailable,
}
impl Degradation {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::VectorSearchUnavailable => "vector_search_unavailable",
			Self::KeywordSearchUnavailable => "keyword_search_unavailable",
			Self::RerankerUnavailable => "reranker_unavailable",
			Self::EmbeddingsUnavailable => "embeddings_unavailable",
			Self::SummarizerUnavailable => "summarizer_unavailable",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
	pub request_id: Uuid,
	pub answer: String,
	pub citations: Vec<Citation>,
	pub confidence: f32,
	pub grounded: bool,
	pub degraded: bool,
	pub degradations: Vec<Degradation>,
	pub needs_review: bool,
	pub outcome: AnswerOutcome,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl AnswerResult {
	pub fn not_grounded(request_id: Uuid, degradations: Vec<Degradation>) -> Self {
		Self {
			request_id,
			answer: NOT_GROUNDED_MESSAGE.to_string(),
			citations: Vec::new(),
			confidence: 0.0,
			grounded: false,
			degraded: !degradations.is_empty(),
			degradations,
			needs_review: false,
			outcome: AnswerOutcome::NotGrounded,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	pub fn out_of_scope(request_id: Uuid) -> Self {
		Self {
			request_id,
			answer: OUT_OF_SCOPE_MESSAGE.to_string(),
			citations: Vec::new(),
			confidence: 0.0,
			grounded: false,
			degraded: false,
			degradations: Vec::new(),
			needs_review: false,
			outcome: AnswerOutcome::OutOfScope,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	/// Document ids this answer depends on.
	pub fn cited_documents(&self) -> Vec<String> {
		let mut out: Vec<String> =
			self.citations.iter().map(|citation| citation.document_id.clone()).collect();

		out.sort();
		out.dedup();

		out
	}
}
