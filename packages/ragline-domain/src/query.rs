use serde::{Deserialize, Serialize};
use time::Date;

use crate::candidate::ChunkMetadata;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
	Factual,
	Procedural,
	Comparative,
	Analytical,
	Conversational,
	OffTopic,
}
impl Intent {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Factual => "factual",
			Self::Procedural => "procedural",
			Self::Comparative => "comparative",
			Self::Analytical => "analytical",
			Self::Conversational => "conversational",
			Self::OffTopic => "off_topic",
		}
	}
}

/// Inclusive calendar range. An open end is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
	pub from: Option<Date>,
	pub to: Option<Date>,
}
impl DateRange {
	pub fn contains(&self, date: Date) -> bool {
		self.from.map(|from| date >= from).unwrap_or(true)
			&& self.to.map(|to| date <= to).unwrap_or(true)
	}

	pub fn is_unbounded(&self) -> bool {
		self.from.is_none() && self.to.is_none()
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
	pub department: Option<String>,
	pub region: Option<String>,
	pub date_range: Option<DateRange>,
	/// Always the caller's groups, sorted and deduplicated.
	pub acl_groups: Vec<String>,
}
impl QueryFilters {
	/// Filter pairs in a stable order, for hashing.
	pub fn pairs(&self) -> Vec<(&'static str, String)> {
		let mut out = Vec::new();

		if let Some(department) = self.department.as_ref() {
			out.push(("department", department.clone()));
		}
		if let Some(range) = self.date_range.as_ref() {
			if let Some(from) = range.from {
				out.push(("date_from", from.to_string()));
			}
			if let Some(to) = range.to {
				out.push(("date_to", to.to_string()));
			}
		}
		if let Some(region) = self.region.as_ref() {
			out.push(("region", region.clone()));
		}

		out.sort();

		out
	}

	/// Local re-check of what the index was asked to enforce.
	///
	/// A chunk is admitted only if it shares at least one group with the caller and agrees with
	/// every set department or region filter. Department and region compare exactly, like the
	/// index's keyword match, and are stored lowercase. Chunks without an effective date pass
	/// the date range.
	pub fn admits(&self, metadata: &ChunkMetadata) -> bool {
		if !metadata.acl_groups.iter().any(|group| self.acl_groups.contains(group)) {
			return false;
		}
		if let Some(department) = self.department.as_deref()
			&& metadata.department.as_deref() != Some(department)
		{
			return false;
		}
		if let Some(region) = self.region.as_deref()
			&& metadata.region.as_deref() != Some(region)
		{
			return false;
		}
		if let (Some(range), Some(date)) = (self.date_range.as_ref(), metadata.effective_date)
			&& !range.contains(date)
		{
			return false;
		}

		true
	}
}

/// One normalized request. Built once by the normalizer and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
	pub raw: String,
	pub normalized: String,
	pub intent: Intent,
	pub intent_confidence: f32,
	pub filters: QueryFilters,
	/// The text asks about earlier versions of something.
	pub historical: bool,
}
impl Query {
	/// Whether superseded versions should stay in context next to the current one.
	pub fn retains_history(&self) -> bool {
		self.historical || self.intent == Intent::Comparative
	}
}

#[cfg(test)]
mod tests {
	use time::macros::date;

	use super::*;

	fn metadata(groups: &[&str]) -> ChunkMetadata {
		ChunkMetadata {
			acl_groups: groups.iter().map(|group| group.to_string()).collect(),
			..Default::default()
		}
	}

	#[test]
	fn admits_requires_group_overlap() {
		let filters = QueryFilters { acl_groups: vec!["hr".to_string()], ..Default::default() };

		assert!(filters.admits(&metadata(&["hr", "finance"])));
		assert!(!filters.admits(&metadata(&["finance"])));
		assert!(!filters.admits(&metadata(&[])));
	}

	#[test]
	fn admits_checks_department_and_dates() {
		let filters = QueryFilters {
			department: Some("hr".to_string()),
			date_range: Some(DateRange { from: Some(date!(2023 - 01 - 01)), to: None }),
			acl_groups: vec!["hr".to_string()],
			..Default::default()
		};
		let mut chunk = metadata(&["hr"]);

		chunk.department = Some("hr".to_string());
		chunk.effective_date = Some(date!(2024 - 03 - 01));

		assert!(filters.admits(&chunk));

		chunk.department = Some("HR".to_string());

		assert!(!filters.admits(&chunk));

		chunk.department = Some("hr".to_string());

		chunk.effective_date = Some(date!(2022 - 12 - 31));

		assert!(!filters.admits(&chunk));

		chunk.effective_date = None;
		chunk.department = Some("finance".to_string());

		assert!(!filters.admits(&chunk));
	}

	#[test]
	fn filter_pairs_are_sorted() {
		let filters = QueryFilters {
			department: Some("hr".to_string()),
			region: Some("emea".to_string()),
			date_range: None,
			acl_groups: Vec::new(),
		};
		let keys: Vec<&str> = filters.pairs().into_iter().map(|(key, _)| key).collect();

		assert_eq!(keys, vec!["department", "region"]);
	}
}
