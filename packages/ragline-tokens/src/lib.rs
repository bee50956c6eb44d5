pub use tokenizers::Tokenizer;

use unicode_segmentation::UnicodeSegmentation;

pub type TokenizerError = tokenizers::Error;

/// Counts model tokens in a piece of text.
///
/// Counts are expected to be additive over sentence concatenation, up to small rounding.
/// Budget checks always recount the final text rather than trusting sums of parts.
pub trait TokenCounter
where
	Self: Send + Sync,
{
	fn count(&self, text: &str) -> u32;
}

/// Counts Unicode word segments and punctuation marks, ignoring whitespace.
///
/// Used when no tokenizer is configured. Usually within a small factor of BPE counts for
/// English prose.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordTokenCounter;
impl TokenCounter for WordTokenCounter {
	fn count(&self, text: &str) -> u32 {
		text.split_word_bounds().filter(|segment| !segment.trim().is_empty()).count() as u32
	}
}

pub struct TokenizerCounter {
	tokenizer: Tokenizer,
}
impl TokenizerCounter {
	pub fn new(tokenizer: Tokenizer) -> Self {
		Self { tokenizer }
	}

	pub fn from_pretrained(repo: &str) -> Result<Self, TokenizerError> {
		load_tokenizer(repo).map(Self::new)
	}
}
impl TokenCounter for TokenizerCounter {
	fn count(&self, text: &str) -> u32 {
		match self.tokenizer.encode(text, false) {
			Ok(encoding) => encoding.len() as u32,
			Err(err) => {
				tracing::error!(error = %err, "Tokenizer failed to encode text. Falling back to word count.");

				WordTokenCounter.count(text)
			},
		}
	}
}

pub fn load_tokenizer(repo: &str) -> Result<Tokenizer, TokenizerError> {
	Tokenizer::from_pretrained(repo, None)
}

/// Longest prefix of whole sentences of `text` that fits in `max_tokens`.
///
/// Never cuts inside a sentence. Returns an empty string when even the first sentence does
/// not fit.
pub fn fit_sentences(text: &str, max_tokens: u32, counter: &dyn TokenCounter) -> String {
	let mut kept = String::new();

	for sentence in text.split_sentence_bounds() {
		let candidate = format!("{kept}{sentence}");

		if counter.count(candidate.trim_end()) > max_tokens {
			break;
		}

		kept = candidate;
	}

	kept.trim_end().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn word_counter_skips_whitespace() {
		assert_eq!(WordTokenCounter.count(""), 0);
		assert_eq!(WordTokenCounter.count("Paid  time off."), 4);
	}

	#[test]
	fn fits_whole_sentences_only() {
		let text = "Staff get 20 days. Carry over is capped at 5 days. Ask HR for details.";

		assert_eq!(fit_sentences(text, 5, &WordTokenCounter), "Staff get 20 days.");
		assert_eq!(
			fit_sentences(text, 14, &WordTokenCounter),
			"Staff get 20 days. Carry over is capped at 5 days."
		);
		assert_eq!(fit_sentences(text, 3, &WordTokenCounter), "");
	}
}
