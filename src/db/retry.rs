use crate::db::error::DbError;
use crate::db::repo::Abort;
use std::future::Future;
use std::time::Duration;

/// Bounded retry for conflicting transactions.
///
/// A conflicting attempt is retried up to `max_retries` times; the delay between attempts grows
/// exponentially from `base_delay_ms` and is capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub(crate) fn calculate_delay(&self, attempt: usize) -> Duration {
        // 1 << 63 is the largest shift that fits a u64
        let shift = attempt.min(63);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Drives `attempt` until it succeeds, fails with something other than a conflict, or the
    /// retry budget is spent. Rejections are returned as-is and never retried.
    pub(crate) async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, Abort<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, Abort<E>>>,
    {
        for n in 0..=self.max_retries {
            match attempt(n).await {
                Err(Abort::Store(e)) if e.is_conflict() => {
                    if n == self.max_retries {
                        break;
                    }
                    let delay = self.calculate_delay(n);
                    tracing::warn!(attempt = n + 1, delay_ms = delay.as_millis() as u64, error = %e, "transaction conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }

        tracing::error!(attempts = self.max_retries + 1, "transaction retries exhausted");
        Err(Abort::Store(DbError::RetriesExhausted {
            attempts: self.max_retries + 1,
        }))
    }
}
