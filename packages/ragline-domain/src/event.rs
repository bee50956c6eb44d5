use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Inbound notice that a source document changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdated {
	pub document_id: String,
	/// Hash of the chunk that changed. Absent when the whole document should be treated as
	/// changed.
	#[serde(default)]
	pub chunk_hash: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub changed_at: OffsetDateTime,
}
