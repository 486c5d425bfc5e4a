//! Exponential backoff for transient port failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ledger_sync_types::{
    ProcessingState, SourceError, SubmissionError, SubmissionPort, SubmissionReceipt, Transaction,
};
use rand::Rng;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Wait requested by the remote side, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for SourceError {
    fn is_retryable(&self) -> bool {
        SourceError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        SourceError::retry_after(self)
    }
}

impl Retryable for SubmissionError {
    fn is_retryable(&self) -> bool {
        SubmissionError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        SubmissionError::retry_after(self)
    }
}

/// Bounded retries with capped exponential delay.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`, capped at
/// `max_delay`. With `jitter` the actual wait is drawn uniformly from
/// `[0, delay]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Upper bound of the wait before retry number `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.backoff(attempt);
        if !self.jitter || cap.is_zero() {
            return cap;
        }
        let millis = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }

    /// Calls `op` until it succeeds, fails permanently or retries run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = e
                        .retry_after()
                        .map(|d| d.min(self.max_delay))
                        .unwrap_or_else(|| self.delay_for(attempt));
                    attempt += 1;
                    warn!(attempt, ?delay, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Submission port decorator that retries transient failures.
pub struct RetryingSubmitter<P: SubmissionPort> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: SubmissionPort> RetryingSubmitter<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SubmissionPort> SubmissionPort for RetryingSubmitter<P> {
    async fn submit(
        &self,
        tx: &Transaction,
        state: &ProcessingState,
        destination_account_id: &str,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        self.policy
            .run(|| self.inner.submit(tx, state, destination_account_id))
            .await
    }
}
