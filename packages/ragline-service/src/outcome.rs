use ragline_domain::Degradation;

use crate::Error;

/// Result of a pipeline stage that may lose signal without failing.
#[derive(Debug)]
pub enum StageOutcome<T> {
	Ok(T),
	Degraded(T, Degradation),
	Unavailable(Error),
}
impl<T> StageOutcome<T> {
	pub fn map<U, F>(self, f: F) -> StageOutcome<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Self::Ok(data) => StageOutcome::Ok(f(data)),
			Self::Degraded(data, reason) => StageOutcome::Degraded(f(data), reason),
			Self::Unavailable(err) => StageOutcome::Unavailable(err),
		}
	}

	pub fn is_degraded(&self) -> bool {
		matches!(self, Self::Degraded(..))
	}

	/// Splits into the data and the optional degradation, or the hard failure.
	pub fn into_parts(self) -> Result<(T, Option<Degradation>), Error> {
		match self {
			Self::Ok(data) => Ok((data, None)),
			Self::Degraded(data, reason) => Ok((data, Some(reason))),
			Self::Unavailable(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn into_parts_keeps_the_reason() {
		let outcome = StageOutcome::Degraded(3, Degradation::RerankerUnavailable).map(|n| n * 2);

		assert!(outcome.is_degraded());
		assert_eq!(outcome.into_parts().ok(), Some((6, Some(Degradation::RerankerUnavailable))));
	}

	#[test]
	fn unavailable_is_an_error() {
		let outcome: StageOutcome<u8> =
			StageOutcome::Unavailable(Error::RetrievalUnavailable { message: "down".to_string() });

		assert!(matches!(outcome.into_parts(), Err(Error::RetrievalUnavailable { .. })));
	}
}
