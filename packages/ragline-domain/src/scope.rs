use serde::{Deserialize, Serialize};

const MAX_GROUP_BYTES: usize = 128;

/// Access context supplied by the caller. Groups bound everything the request may read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
	pub groups: Vec<String>,
	#[serde(default)]
	pub department: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
}
impl Scope {
	pub fn new<I, S>(groups: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { groups: groups.into_iter().map(Into::into).collect(), department: None, region: None }
	}

	pub fn validate(&self) -> Result<(), ScopeViolation> {
		if self.groups.is_empty() {
			return Err(ScopeViolation::NoGroups);
		}

		for group in &self.groups {
			if group.trim().is_empty() {
				return Err(ScopeViolation::BlankGroup);
			}
			if group.len() > MAX_GROUP_BYTES {
				return Err(ScopeViolation::GroupTooLong { group: group.clone() });
			}
			if !group.chars().all(is_group_char) {
				return Err(ScopeViolation::InvalidGroupChar { group: group.clone() });
			}
		}

		Ok(())
	}

	/// Sorted, deduplicated group list. Two scopes with the same groups in a different order
	/// are the same scope.
	pub fn sorted_groups(&self) -> Vec<String> {
		let mut groups = self.groups.clone();

		groups.sort();
		groups.dedup();

		groups
	}
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScopeViolation {
	#[error("scope must carry at least one access group")]
	NoGroups,
	#[error("scope groups must be non-blank")]
	BlankGroup,
	#[error("scope group {group:?} exceeds {MAX_GROUP_BYTES} bytes")]
	GroupTooLong { group: String },
	#[error("scope group {group:?} contains unsupported characters")]
	InvalidGroupChar { group: String },
}

fn is_group_char(ch: char) -> bool {
	ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | ':' | '@' | '-')
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_and_malformed_groups() {
		assert_eq!(Scope::default().validate(), Err(ScopeViolation::NoGroups));
		assert_eq!(Scope::new(["  "]).validate(), Err(ScopeViolation::BlankGroup));
		assert!(matches!(
			Scope::new(["hr staff"]).validate(),
			Err(ScopeViolation::InvalidGroupChar { .. })
		));
		assert!(Scope::new(["HR", "org:finance"]).validate().is_ok());
	}

	#[test]
	fn sorted_groups_ignores_order_and_duplicates() {
		let scope = Scope::new(["b", "a", "b"]);

		assert_eq!(scope.sorted_groups(), vec!["a".to_string(), "b".to_string()]);
	}
}
