use crate::error::HelloError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounded retry with a doubling backoff, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 1,
            next_wait: self.initial_backoff,
        }
    }

    /// Runs `operation` until it succeeds, fails with a terminal error or the
    /// attempts are exhausted. Cancelling `shutdown` interrupts both the attempts
    /// and the waits in between.
    pub async fn retry<T, F, Fut>(
        &self,
        what: &str,
        shutdown: &CancellationToken,
        mut operation: F,
    ) -> Result<T, HelloError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HelloError>>,
    {
        let mut backoff = self.backoff();
        loop {
            let result = tokio::select! {
                result = operation() => result,
                _ = shutdown.cancelled() => return Err(HelloError::Cancelled),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) => backoff.wait(what, e, shutdown).await?,
            }
        }
    }
}

/// Retry state of one operation
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    next_wait: Duration,
}

impl Backoff {
    /// Time to wait before the next attempt, `None` if the error must be given up on.
    pub fn retry_after(&mut self, error: &HelloError) -> Option<Duration> {
        if !error.is_transient() || self.attempt >= self.policy.max_attempts {
            return None;
        }
        let wait = self.next_wait;
        self.attempt += 1;
        self.next_wait = std::cmp::min(self.next_wait * 2, self.policy.max_backoff);
        Some(wait)
    }

    /// Waits before the next attempt or hands the error back when giving up.
    pub async fn wait(
        &mut self,
        what: &str,
        error: HelloError,
        shutdown: &CancellationToken,
    ) -> Result<(), HelloError> {
        let failed_attempt = self.attempt;
        match self.retry_after(&error) {
            Some(wait) => {
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {}ms",
                    what,
                    failed_attempt,
                    self.policy.max_attempts,
                    error,
                    wait.as_millis()
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => Ok(()),
                    _ = shutdown.cancelled() => Err(HelloError::Cancelled),
                }
            }
            None => {
                error!("{} failed after {} attempt(s): {}", what, failed_attempt, error);
                Err(error)
            }
        }
    }
}
