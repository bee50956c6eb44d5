use std::{future::Future, time::Duration};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryPolicy {
	pub(crate) max_retries: u32,
	pub(crate) base_backoff: Duration,
}
impl RetryPolicy {
	pub(crate) fn from_config(cfg: &ragline_config::Retrieval) -> Self {
		Self {
			max_retries: cfg.max_retries,
			base_backoff: Duration::from_millis(cfg.retry_base_backoff_ms),
		}
	}

	fn backoff(&self, attempt: u32) -> Duration {
		self.base_backoff.saturating_mul(1_u32 << attempt.min(16))
	}
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the retry budget is
/// spent. Sleeps `base * 2^attempt` between attempts.
pub(crate) async fn with_retries<T, F, Fut>(
	policy: RetryPolicy,
	operation: &'static str,
	mut call: F,
) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0_u32;

	loop {
		match call().await {
			Ok(value) => return Ok(value),
			Err(err) if attempt < policy.max_retries && err.is_transient() => {
				let delay = policy.backoff(attempt);

				tracing::debug!(
					error = %err,
					operation,
					attempt,
					delay_ms = delay.as_millis() as u64,
					"Retrying collaborator call."
				);
				tokio::time::sleep(delay).await;

				attempt += 1;
			},
			Err(err) => return Err(exhausted(err, operation, attempt)),
		}
	}
}

fn exhausted(err: Error, operation: &'static str, attempt: u32) -> Error {
	if attempt > 0 {
		tracing::warn!(error = %err, operation, retries = attempt, "Collaborator call failed after retries.");
	}

	err
}
