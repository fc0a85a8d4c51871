//! Exponential backoff for flaky upstreams.
//!
//! [`RetryFetch`] decorates any [`Fetcher`] and repeats requests that failed
//! in a way worth repeating: transport errors, `429`, and `5xx` responses.
//! Anything else is returned to the caller on the first attempt.
//!
//! # Backoff
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Dropping the returned future (for example when a cancellation token wins a
//! `select!`) abandons any pending sleep along with it.

use crate::error::HarvestError;
use crate::retrieval::{FetchRequest, FetchResponse, Fetcher};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

pub struct RetryFetch<T> {
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T: Fetcher> RetryFetch<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1) as u32)
            .unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T: Clone> Clone for RetryFetch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

fn retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

impl<T: Fetcher> Fetcher for RetryFetch<T> {
    #[instrument(level = "info", skip_all, fields(url = %request.url))]
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, HarvestError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            let outcome = self.inner.fetch(request.clone()).await;
            let failure = match &outcome {
                Ok(resp) if retryable_status(resp.status) => Some(format!("status {}", resp.status)),
                Err(e) if e.is_retryable() => Some(e.to_string()),
                _ => None,
            };
            let Some(failure) = failure else {
                return outcome;
            };

            attempt += 1;
            if attempt > self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %failure,
                    "fetch exhausted retries"
                );
                return outcome;
            }

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max = self.max_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                ?delay,
                error = %failure,
                "fetch attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}
