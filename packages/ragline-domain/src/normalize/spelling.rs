use std::collections::HashSet;

const MIN_CORRECTABLE_CHARS: usize = 4;
const LONG_TOKEN_CHARS: usize = 8;

/// Edit-distance correction towards a closed domain vocabulary.
pub struct SpellCorrector {
	words: Vec<String>,
	known: HashSet<String>,
	max_edit_distance: usize,
}
impl SpellCorrector {
	pub fn new(dictionary: &[String], max_edit_distance: u32) -> Self {
		let words: Vec<String> = dictionary.iter().map(|word| word.to_lowercase()).collect();
		let known = words.iter().cloned().collect();

		Self { words, known, max_edit_distance: max_edit_distance as usize }
	}

	/// Returns the replacement for `token`, or `None` when the token should stay as written.
	///
	/// Short tokens, tokens with non-letters, known words, and ambiguous matches (two dictionary
	/// words at the same best distance) are all left alone.
	pub fn correct(&self, token: &str) -> Option<&str> {
		let len = token.chars().count();

		if len < MIN_CORRECTABLE_CHARS || !token.chars().all(|ch| ch.is_ascii_alphabetic()) {
			return None;
		}
		if self.known.contains(token) {
			return None;
		}

		let allowed = if len < LONG_TOKEN_CHARS { 1 } else { self.max_edit_distance.max(1) };
		let mut best: Option<(usize, &str)> = None;
		let mut ambiguous = false;

		for word in &self.words {
			if word.len().abs_diff(token.len()) > allowed {
				continue;
			}

			let Some(distance) = bounded_levenshtein(token, word, allowed) else { continue };

			match best {
				Some((best_distance, _)) if distance > best_distance => {},
				Some((best_distance, _)) if distance == best_distance => ambiguous = true,
				_ => {
					best = Some((distance, word.as_str()));
					ambiguous = false;
				},
			}
		}

		if ambiguous {
			return None;
		}

		best.map(|(_, word)| word)
	}
}

/// Levenshtein distance between two ASCII strings, or `None` once it exceeds `limit`.
pub fn bounded_levenshtein(lhs: &str, rhs: &str, limit: usize) -> Option<usize> {
	let lhs = lhs.as_bytes();
	let rhs = rhs.as_bytes();
	let mut prev: Vec<usize> = (0..=rhs.len()).collect();
	let mut curr = vec![0_usize; rhs.len() + 1];

	for (i, l) in lhs.iter().enumerate() {
		curr[0] = i + 1;

		let mut row_min = curr[0];

		for (j, r) in rhs.iter().enumerate() {
			let cost = usize::from(l != r);

			curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
			row_min = row_min.min(curr[j + 1]);
		}

		if row_min > limit {
			return None;
		}

		std::mem::swap(&mut prev, &mut curr);
	}

	let distance = prev[rhs.len()];

	(distance <= limit).then_some(distance)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn corrector(words: &[&str]) -> SpellCorrector {
		let words: Vec<String> = words.iter().map(|word| word.to_string()).collect();

		SpellCorrector::new(&words, 2)
	}

	#[test]
	fn corrects_single_typo() {
		let spelling = corrector(&["vacation", "policy"]);

		assert_eq!(spelling.correct("vacaton"), Some("vacation"));
		assert_eq!(spelling.correct("polcy"), Some("policy"));
	}

	#[test]
	fn leaves_known_short_and_distant_tokens() {
		let spelling = corrector(&["vacation", "policy"]);

		assert_eq!(spelling.correct("policy"), None);
		assert_eq!(spelling.correct("pto"), None);
		assert_eq!(spelling.correct("payroll"), None);
		assert_eq!(spelling.correct("2024"), None);
	}

	#[test]
	fn fails_open_on_ambiguous_match() {
		let spelling = corrector(&["claim", "clamp"]);

		assert_eq!(spelling.correct("clamx"), Some("clamp"));
		assert_eq!(spelling.correct("claip"), None);
	}

	#[test]
	fn distance_is_bounded() {
		assert_eq!(bounded_levenshtein("kitten", "sitting", 3), Some(3));
		assert_eq!(bounded_levenshtein("kitten", "sitting", 2), None);
		assert_eq!(bounded_levenshtein("", "abc", 3), Some(3));
	}
}
