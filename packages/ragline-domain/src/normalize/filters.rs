use regex::Regex;
use time::{Date, Month};

use crate::{
	query::{DateRange, QueryFilters},
	scope::Scope,
};

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2999;
const HISTORICAL_PATTERN: &str = r"\b(previous|prior|old|older|former|formerly|history|historical|historically|used to|back in|earlier|superseded|outdated|before \d{4})\b";

#[derive(Clone, Copy, Debug)]
enum DateCue {
	Between,
	Since,
	Before,
	In,
}

const DATE_PATTERNS: [(DateCue, &str); 4] = [
	(DateCue::Between, r"\bbetween (\d{4}) and (\d{4})\b"),
	(DateCue::Since, r"\b(?:since|after|from) (\d{4})\b"),
	(DateCue::Before, r"\b(?:before|prior to|until) (\d{4})\b"),
	(DateCue::In, r"\b(?:in|during|for) (\d{4})\b"),
];

/// Heuristic filter extraction over lowercase query text.
pub struct FilterExtractor {
	departments: Vec<String>,
	regions: Vec<String>,
	date_patterns: Vec<(DateCue, Regex)>,
	historical: Option<Regex>,
}
impl FilterExtractor {
	pub fn new(departments: &[String], regions: &[String]) -> Self {
		let date_patterns = DATE_PATTERNS
			.iter()
			.filter_map(|(cue, pattern)| Regex::new(pattern).ok().map(|re| (*cue, re)))
			.collect();

		Self {
			departments: departments.iter().map(|value| value.to_lowercase()).collect(),
			regions: regions.iter().map(|value| value.to_lowercase()).collect(),
			date_patterns,
			historical: Regex::new(HISTORICAL_PATTERN).ok(),
		}
	}

	/// Builds filters from `text` and the caller scope.
	///
	/// Scope values win over inferred ones, and ACL groups come from the scope alone.
	pub fn extract(&self, text: &str, scope: &Scope) -> QueryFilters {
		let department = scope
			.department
			.as_ref()
			.map(|value| value.trim().to_lowercase())
			.filter(|value| !value.is_empty())
			.or_else(|| find_vocabulary(text, &self.departments));
		let region = scope
			.region
			.as_ref()
			.map(|value| value.trim().to_lowercase())
			.filter(|value| !value.is_empty())
			.or_else(|| find_vocabulary(text, &self.regions));

		QueryFilters {
			department,
			region,
			date_range: self.extract_date_range(text),
			acl_groups: scope.sorted_groups(),
		}
	}

	pub fn is_historical(&self, text: &str) -> bool {
		self.historical.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
	}

	fn extract_date_range(&self, text: &str) -> Option<DateRange> {
		for (cue, re) in &self.date_patterns {
			let Some(captures) = re.captures(text) else { continue };
			let first = captures.get(1).and_then(|m| parse_year(m.as_str()));
			let range = match cue {
				DateCue::Between => {
					let second = captures.get(2).and_then(|m| parse_year(m.as_str()));

					match (first, second) {
						(Some(lhs), Some(rhs)) => {
							let (lo, hi) = if lhs <= rhs { (lhs, rhs) } else { (rhs, lhs) };

							DateRange { from: year_start(lo), to: year_end(hi) }
						},
						_ => continue,
					}
				},
				DateCue::Since => DateRange { from: first.and_then(year_start), to: None },
				DateCue::Before =>
					DateRange { from: None, to: first.and_then(|year| year_end(year - 1)) },
				DateCue::In =>
					DateRange { from: first.and_then(year_start), to: first.and_then(year_end) },
			};

			if !range.is_unbounded() {
				return Some(range);
			}
		}

		None
	}
}

fn find_vocabulary(text: &str, vocabulary: &[String]) -> Option<String> {
	let mut padded = String::with_capacity(text.len() + 2);

	padded.push(' ');

	for ch in text.chars() {
		if ch.is_alphanumeric() { padded.push(ch) } else { padded.push(' ') }
	}

	padded.push(' ');

	vocabulary
		.iter()
		.find(|word| padded.contains(format!(" {word} ").as_str()))
		.cloned()
}

fn parse_year(raw: &str) -> Option<i32> {
	raw.parse::<i32>().ok().filter(|year| (MIN_YEAR..=MAX_YEAR).contains(year))
}

fn year_start(year: i32) -> Option<Date> {
	Date::from_calendar_date(year, Month::January, 1).ok()
}

fn year_end(year: i32) -> Option<Date> {
	Date::from_calendar_date(year, Month::December, 31).ok()
}
