pub mod answer;
pub mod candidate;
pub mod context;
pub mod event;
pub mod normalize;
pub mod query;
pub mod scope;

pub use answer::{
	AnswerOutcome, AnswerResult, Citation, Degradation, NOT_GROUNDED_MESSAGE,
	OUT_OF_SCOPE_MESSAGE, UNCITED_CONFIDENCE,
};
pub use candidate::{Candidate, ChunkMetadata, IndexHit, VersionRole, chunk_hash};
pub use context::RankedContext;
pub use event::DocumentUpdated;
pub use normalize::{Classification, IntentClassifier, QueryNormalizer, RuleIntentClassifier};
pub use query::{DateRange, Intent, Query, QueryFilters};
pub use scope::{Scope, ScopeViolation};
