//! Bounded retry of transient carrier failures.
//!
//! Every carrier call goes through one [`RetryPolicy`]: a fixed pause between attempts, a hard
//! attempt limit and [`CarrierError::is_transient`] as the classifier. Non-transient failures
//! are returned after the first attempt.

use crate::carrier::CarrierError;
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry settings shared by every carrier client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	max_attempts: usize,
	backoff: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			backoff: Duration::from_secs(3),
		}
	}
}

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
	/// Every attempt failed transiently. Fatal for the run.
	#[error("gave up after {attempts} attempts: {last}")]
	Exhausted { attempts: usize, last: CarrierError },

	/// A failure that retrying cannot fix. Recorded against the item.
	#[error(transparent)]
	Permanent(CarrierError),
}

impl RetryPolicy {
	/// Create a new retry policy.
	///
	/// # Arguments
	/// * `max_attempts` - Total attempts including the first; at least one is always made.
	/// * `backoff` - Fixed pause between attempts.
	pub fn new(max_attempts: usize, backoff: Duration) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			backoff,
		}
	}

	pub fn max_attempts(&self) -> usize {
		self.max_attempts
	}

	/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
	///
	/// # Arguments
	/// * `label` - Names the operation in retry warnings.
	/// * `operation` - Produces one attempt per call.
	pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, CarrierError>>,
	{
		let mut attempts = 0usize;
		let result = backoff::future::retry_notify(
			BoundedConstant::new(self.max_attempts - 1, self.backoff),
			|| {
				attempts += 1;
				let attempt = operation();
				async move {
					attempt.await.map_err(|e| {
						if e.is_transient() {
							backoff::Error::transient(e)
						} else {
							backoff::Error::permanent(e)
						}
					})
				}
			},
			|e: CarrierError, wait: Duration| {
				warn!("{} failed: {}. Retrying in {:?}", label, e, wait);
			},
		)
		.await;

		match result {
			Ok(value) => Ok(value),
			Err(last) if last.is_transient() => Err(RetryError::Exhausted { attempts, last }),
			Err(e) => Err(RetryError::Permanent(e)),
		}
	}
}

/// Constant pause that stops after a fixed number of retries.
struct BoundedConstant {
	interval: Duration,
	retries: usize,
	remaining: usize,
}

impl BoundedConstant {
	fn new(retries: usize, interval: Duration) -> Self {
		Self {
			interval,
			retries,
			remaining: retries,
		}
	}
}

impl Backoff for BoundedConstant {
	fn reset(&mut self) {
		self.remaining = self.retries;
	}

	fn next_backoff(&mut self) -> Option<Duration> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		Some(self.interval)
	}
}
