use std::collections::HashMap;

/// Appends configured expansions after acronym or synonym tokens.
pub struct SynonymExpander {
	table: HashMap<String, Vec<String>>,
}
impl SynonymExpander {
	pub fn new(table: &HashMap<String, Vec<String>>) -> Self {
		let table = table
			.iter()
			.map(|(key, terms)| {
				(key.to_lowercase(), terms.iter().map(|term| term.to_lowercase()).collect())
			})
			.collect();

		Self { table }
	}

	/// Expands lowercase `tokens`. An expansion already present in the text is not repeated.
	pub fn expand(&self, tokens: &[String]) -> Vec<String> {
		if self.table.is_empty() {
			return tokens.to_vec();
		}

		let mut text = format!(" {} ", tokens.join(" "));
		let mut out = Vec::with_capacity(tokens.len());

		for token in tokens {
			out.push(token.clone());

			let key = token.trim_matches(|ch: char| !ch.is_alphanumeric());
			let Some(terms) = self.table.get(key) else { continue };

			for term in terms {
				let needle = format!(" {term} ");

				if text.contains(needle.as_str()) {
					continue;
				}

				out.extend(term.split_whitespace().map(str::to_string));
				text.push_str(term);
				text.push(' ');
			}
		}

		out
	}
}
