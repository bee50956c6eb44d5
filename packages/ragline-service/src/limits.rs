use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{Error, Result};

/// One semaphore per collaborator type. Every external call holds a permit while in flight.
pub struct CallLimits {
	pub(crate) vector: Semaphore,
	pub(crate) keyword: Semaphore,
	pub(crate) embedding: Semaphore,
	pub(crate) rerank: Semaphore,
	pub(crate) summarizer: Semaphore,
	pub(crate) generation: Semaphore,
}
impl CallLimits {
	pub fn new(max_in_flight: u32) -> Self {
		let permits = max_in_flight.max(1) as usize;

		Self {
			vector: Semaphore::new(permits),
			keyword: Semaphore::new(permits),
			embedding: Semaphore::new(permits),
			rerank: Semaphore::new(permits),
			summarizer: Semaphore::new(permits),
			generation: Semaphore::new(permits),
		}
	}
}

pub(crate) async fn acquire<'a>(
	semaphore: &'a Semaphore,
	collaborator: &'static str,
) -> Result<SemaphorePermit<'a>> {
	semaphore.acquire().await.map_err(|_| Error::ServiceUnavailable {
		message: format!("{collaborator} call limiter is closed"),
	})
}
