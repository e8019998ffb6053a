//! Bounded retry with exponential back-off.
//!
//! Callers classify their own errors through [`Transient`]; anything not
//! transient fails immediately, transient failures are retried until the
//! policy's attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Errors that know whether repeating the operation could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Final error of a retried operation.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts actually made.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: E,
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
///
/// # Errors
///
/// Returns the last error together with the number of attempts made.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, what: &'static str, mut op: F) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let total = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < total => {
                let delay = policy.delay_for(attempt);
                warn!(
                    %what,
                    %error,
                    attempt,
                    total,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(RetryFailure { attempts: attempt, error }),
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
