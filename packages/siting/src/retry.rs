//! Bounded retry with exponential backoff for store requests.
//!
//! Only [`StoreError::is_transient`] failures are retried; a missing node
//! or region is permanent and returned immediately. Runs on the blocking
//! region worker, so the backoff sleeps the current thread.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::store::StoreError;

/// Retry policy applied to individual store requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles for each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy from its parts.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base`, `2 * base`,
    /// `4 * base`, ...
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `op` until it succeeds, fails permanently, or the retries are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last [`StoreError`] produced by `op`.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{what} failed (retry {attempt}/{}), retrying in {delay:?}: {e}",
                        self.max_retries
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn backend() -> StoreError {
        StoreError::Backend {
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = policy.run("write", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(backend()) } else { Ok(42) }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<(), _> = policy.run("write", || {
            calls.set(calls.get() + 1);
            Err(backend())
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn does_not_retry_missing_nodes() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: Result<(), _> = policy.run("write", || {
            calls.set(calls.get() + 1);
            Err(StoreError::NodeNotFound(9))
        });

        assert!(matches!(result, Err(StoreError::NodeNotFound(9))));
        assert_eq!(calls.get(), 1);
    }
}
