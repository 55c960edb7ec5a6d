use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Exponential backoff without randomization, so delays are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Doubling delays from `base_delay`, capped at `max_delay`, never giving up
    /// on elapsed time; the attempt budget bounds the loop instead.
    pub fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay to wait after the given zero-based attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut backoff = self.backoff();
        (0..=attempt.min(64))
            .filter_map(|_| backoff.next_backoff())
            .last()
            .unwrap_or(self.max_delay)
    }
}

/// Result of a single external call attempt.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    Transient(Error),
    Fatal(Error),
}

impl<T> CallOutcome<T> {
    /// Sorts a call result into success, transient, or fatal failure.
    pub fn classify(result: Result<T>, is_transient: fn(&Error) -> bool) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(e) if is_transient(&e) => CallOutcome::Transient(e),
            Err(e) => CallOutcome::Fatal(e),
        }
    }
}

/// Runs `call` once, bounded by `timeout` and aborted by `cancel`.
/// A timeout is always reported as a transient failure.
pub async fn attempt<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
    is_transient: fn(&Error) -> bool,
) -> CallOutcome<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => CallOutcome::Fatal(Error::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => CallOutcome::classify(inner, is_transient),
            Err(_) => CallOutcome::Transient(Error::Timeout(timeout)),
        },
    }
}

/// Repeats `make_call` under `policy` until it succeeds, hits a fatal error,
/// or exhausts its attempts. Returns the last error on failure.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    label: &str,
    make_call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_when(policy, timeout, cancel, label, Error::is_retryable, make_call).await
}

/// Like `with_retry`, with a caller-chosen notion of which errors are transient.
pub async fn with_retry_when<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    label: &str,
    is_transient: fn(&Error) -> bool,
    make_call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_gated(policy, timeout, cancel, label, is_transient, || async {}, make_call).await
}

/// Full retry loop. `gate` runs before every attempt, outside the timeout,
/// so waiting on a rate limiter does not count against the call itself.
/// A `RateLimited` failure waits at least its `Retry-After` before the
/// next attempt.
pub async fn with_retry_gated<T, G, GFut, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
    label: &str,
    is_transient: fn(&Error) -> bool,
    mut gate: G,
    mut make_call: F,
) -> Result<T>
where
    G: FnMut() -> GFut,
    GFut: Future<Output = ()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut last_error = None;

    for attempt_no in 0..policy.max_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = gate() => {}
        }

        match attempt(make_call(), timeout, cancel, is_transient).await {
            CallOutcome::Success(value) => return Ok(value),
            CallOutcome::Fatal(e) => return Err(e),
            CallOutcome::Transient(e) => {
                if attempt_no + 1 < policy.max_attempts {
                    let mut delay = backoff.next_backoff().unwrap_or(policy.max_delay);
                    if let Error::RateLimited(secs) = &e {
                        delay = delay.max(Duration::from_secs(*secs));
                    }
                    tracing::warn!(
                        "Attempt {} failed for {}, retrying in {:?}: {}",
                        attempt_no + 1,
                        label,
                        delay,
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Config("retry policy allows no attempts".to_string())))
}
