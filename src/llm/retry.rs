//! Bounded exponential backoff around any classified-failure operation.
//!
//! Retryable failures sleep 2^attempt seconds (1 s, 2 s, 4 s, …) between
//! attempts, up to `max_retries` attempts in total. Non-retryable
//! failures propagate immediately; exhaustion propagates the last error.

use crate::errors::OrchestratorError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub async fn with_retry<T, F, Fut>(
    max_retries: u32,
    label: &str,
    mut operation: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let attempts = max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let backoff = Duration::from_secs(1u64 << attempt);
                warn!(
                    label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    backoff_secs = backoff.as_secs(),
                    error = %e,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("retry loop exited without error"))
}
