use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;

/// Post-processed context handed to prompt assembly.
///
/// `total_tokens <= token_budget` holds for every value built through [`RankedContext::new`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedContext {
	pub candidates: Vec<Candidate>,
	pub total_tokens: u32,
	pub token_budget: u32,
}
impl RankedContext {
	pub fn new(candidates: Vec<Candidate>, token_budget: u32) -> Self {
		let total_tokens = candidates.iter().map(|candidate| candidate.token_count).sum();

		debug_assert!(total_tokens <= token_budget, "ranked context exceeds its token budget");

		Self { candidates, total_tokens, token_budget }
	}

	pub fn empty(token_budget: u32) -> Self {
		Self { candidates: Vec::new(), total_tokens: 0, token_budget }
	}

	pub fn is_empty(&self) -> bool {
		self.candidates.is_empty()
	}

	pub fn len(&self) -> usize {
		self.candidates.len()
	}

	/// 1-based lookup matching the `[Source N]` labels in prompts.
	pub fn source(&self, index: usize) -> Option<&Candidate> {
		index.checked_sub(1).and_then(|idx| self.candidates.get(idx))
	}
}
