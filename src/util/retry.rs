use std::time::Duration;

use futures_retry::{ErrorHandler, RetryPolicy};
use tracing::debug;

use super::exception::StoreError;

/// Retry policy for a single backend request.
///
/// Retries only [`StoreError::Retryable`] failures, a fixed number of times with a
/// fixed delay between attempts. `Conflict` and `NotFound` are answers from the
/// store rather than failures, so they are forwarded on the first attempt.
pub(crate) struct FixedCountWithDelayStrategy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedCountWithDelayStrategy {
    pub(crate) fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl ErrorHandler<StoreError> for FixedCountWithDelayStrategy {
    type OutError = StoreError;

    fn handle(&mut self, attempt: usize, e: StoreError) -> RetryPolicy<StoreError> {
        if attempt >= self.max_attempts {
            return RetryPolicy::ForwardError(e);
        }

        match e {
            StoreError::Retryable(ref reason) => {
                debug!(attempt = attempt, reason = %reason, "retrying store request");
                RetryPolicy::WaitRetry(self.delay)
            }
            StoreError::Conflict(_) | StoreError::NotFound(_) | StoreError::NonRetryable(_) => {
                RetryPolicy::ForwardError(e)
            }
        }
    }
}
