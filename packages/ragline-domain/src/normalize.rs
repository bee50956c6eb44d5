mod filters;
mod intent;
mod spelling;
mod synonyms;

pub use filters::FilterExtractor;
pub use intent::{Classification, IntentClassifier, RuleIntentClassifier};
pub use spelling::{SpellCorrector, bounded_levenshtein};
pub use synonyms::SynonymExpander;

use std::sync::Arc;

use unicode_normalization::UnicodeNormalization;

use crate::{query::Query, scope::Scope};

/// Turns raw user text into an immutable [`Query`].
///
/// Every step is pure over the inputs and the injected classifier. Spell correction, intent,
/// and filters read the corrected text; synonym expansion only affects `Query::normalized`.
pub struct QueryNormalizer {
	spelling: SpellCorrector,
	synonyms: SynonymExpander,
	filters: FilterExtractor,
	classifier: Arc<dyn IntentClassifier>,
}
impl QueryNormalizer {
	pub fn new(cfg: &ragline_config::Normalizer, classifier: Arc<dyn IntentClassifier>) -> Self {
		Self {
			spelling: SpellCorrector::new(&cfg.dictionary, cfg.max_edit_distance),
			synonyms: SynonymExpander::new(&cfg.synonyms),
			filters: FilterExtractor::new(&cfg.departments, &cfg.regions),
			classifier,
		}
	}

	pub fn from_config(cfg: &ragline_config::Normalizer) -> Self {
		Self::new(cfg, Arc::new(RuleIntentClassifier))
	}

	pub fn normalize(&self, raw: &str, scope: &Scope) -> Query {
		let folded: String = raw.nfkc().collect::<String>().to_lowercase();
		let corrected: Vec<String> =
			folded.split_whitespace().map(|token| self.correct_token(token)).collect();
		let corrected_text = corrected.join(" ");
		let classification = self.classifier.classify(&corrected_text);
		let filters = self.filters.extract(&corrected_text, scope);
		let historical = self.filters.is_historical(&corrected_text);
		let normalized = self.synonyms.expand(&corrected).join(" ");

		Query {
			raw: raw.to_string(),
			normalized,
			intent: classification.intent,
			intent_confidence: classification.confidence,
			filters,
			historical,
		}
	}

	fn correct_token(&self, token: &str) -> String {
		let Some(start) = token.find(|ch: char| ch.is_alphanumeric()) else {
			return token.to_string();
		};
		let end = token
			.char_indices()
			.rev()
			.find(|(_, ch)| ch.is_alphanumeric())
			.map(|(idx, ch)| idx + ch.len_utf8())
			.unwrap_or(token.len());
		let core = &token[start..end];

		match self.spelling.correct(core) {
			Some(word) => format!("{}{}{}", &token[..start], word, &token[end..]),
			None => token.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn normalizer() -> QueryNormalizer {
		let cfg = ragline_config::Normalizer {
			dictionary: vec!["vacation".to_string(), "policy".to_string()],
			..Default::default()
		};

		QueryNormalizer::from_config(&cfg)
	}

	#[test]
	fn correction_keeps_surrounding_punctuation() {
		let query = normalizer().normalize("What is the vacaton polcy?", &Scope::new(["hr"]));

		assert_eq!(query.normalized, "what is the vacation policy?");
		assert_eq!(query.raw, "What is the vacaton polcy?");
	}

	#[test]
	fn folds_compatibility_forms_and_whitespace() {
		let query = normalizer().normalize("  ＰＴＯ \t rules ", &Scope::new(["hr"]));

		assert_eq!(query.normalized, "pto rules");
	}
}
