//! Capped retry for gateway calls.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::warn;

use super::ExchangeError;

/// Fixed number of attempts separated by a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Run `op` until it succeeds, fails with a fatal error, or attempts run out.
    /// The last error is returned after exhaustion.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let backoff = CappedConstant::new(self.delay, self.max_attempts);

        backoff::future::retry_notify(
            backoff,
            || {
                let attempt = op();
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
            |err: ExchangeError, wait: Duration| {
                warn!(operation = what, error = %err, retry_in = ?wait, "Exchange call failed, retrying");
            },
        )
        .await
    }
}

/// Constant delay with a hard cap on retries.
#[derive(Debug, Clone)]
struct CappedConstant {
    delay: Duration,
    retries: u32,
    remaining: u32,
}

impl CappedConstant {
    fn new(delay: Duration, max_attempts: u32) -> Self {
        let retries = max_attempts.saturating_sub(1);
        Self {
            delay,
            retries,
            remaining: retries,
        }
    }
}

impl Backoff for CappedConstant {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.remaining = self.retries;
    }
}
