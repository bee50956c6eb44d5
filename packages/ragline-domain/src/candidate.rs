use serde::{Deserialize, Serialize};
use time::Date;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
	pub department: Option<String>,
	pub region: Option<String>,
	pub effective_date: Option<Date>,
	pub acl_groups: Vec<String>,
	pub page: Option<u32>,
	pub section: Option<String>,
	/// Identifies versions of the same logical document (e.g. one policy across revisions).
	pub document_family: Option<String>,
}

/// One scored row as returned by an index collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
	pub chunk_id: String,
	pub document_id: String,
	pub text: String,
	pub score: f32,
	pub metadata: ChunkMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionRole {
	Current,
	Superseded,
}

/// A retrieved chunk, scored through every stage of one request.
///
/// Retrieval and fusion scores are written once by the retriever. Later stages only add:
/// the reranker sets `rerank_score`, post-processing may attach an embedding, replace the
/// text with a summary (setting `compressed`), or tag a version role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub chunk_id: String,
	pub document_id: String,
	pub text: String,
	pub chunk_hash: String,
	pub vector_score: Option<f32>,
	pub vector_rank: Option<u32>,
	pub keyword_score: Option<f32>,
	pub keyword_rank: Option<u32>,
	pub fused_score: f32,
	pub rerank_score: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub embedding: Option<Vec<f32>>,
	pub token_count: u32,
	pub compressed: bool,
	pub version_role: Option<VersionRole>,
	pub metadata: ChunkMetadata,
}
impl Candidate {
	pub fn from_hit(hit: IndexHit) -> Self {
		let chunk_hash = chunk_hash(&hit.text);

		Self {
			chunk_id: hit.chunk_id,
			document_id: hit.document_id,
			text: hit.text,
			chunk_hash,
			vector_score: None,
			vector_rank: None,
			keyword_score: None,
			keyword_rank: None,
			fused_score: 0.0,
			rerank_score: None,
			embedding: None,
			token_count: 0,
			compressed: false,
			version_role: None,
			metadata: hit.metadata,
		}
	}

	/// Rerank score when present, otherwise the fused score.
	pub fn relevance(&self) -> f32 {
		self.rerank_score.unwrap_or(self.fused_score)
	}
}

pub fn chunk_hash(text: &str) -> String {
	blake3::hash(text.as_bytes()).to_hex().to_string()
}
