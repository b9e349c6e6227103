//! Retry logic for backend requests with intelligent error classification.

use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::error::{Error, Result};

/// Messages of transient network failures, matched case-insensitively when
/// no typed cause is available.
const TRANSIENT_MESSAGES: &[&str] = &[
    "connection reset",
    "connection refused",
    "broken pipe",
    "timed out",
    "i/o timeout",
    "no such host",
    "dns error",
    "failed to lookup address",
    "name or service not known",
];

/// Tunable retry parameters. Immutable once handed to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one (0 disables retries).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Growth factor per attempt; values below 1 are treated as 1.
    pub multiplier: f64,
    /// Perturb each delay by up to ±25%.
    pub jitter: bool,
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Default policy with a different retry count.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Decides whether a failed attempt is worth repeating.
///
/// Cancellation is checked first so that a caller-initiated abort is never
/// retried regardless of what else the error carries.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Cancelled => false,
        Error::Api(api) => api.is_server_error(),
        Error::Transport { source, .. } => {
            if source.is_timeout() {
                return true;
            }
            is_transient_cause(source)
        }
        Error::Validation(_) | Error::Decode { .. } | Error::Io { .. } => false,
    }
}

/// Walks an error's cause chain looking for a transient network condition,
/// first by `io::ErrorKind`, then by message.
pub(crate) fn is_transient_cause(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }

        let message = err.to_string().to_ascii_lowercase();
        if TRANSIENT_MESSAGES.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = err.source();
    }
    false
}

/// Wait before the retry that follows attempt `attempt` (0-based).
///
/// `initial * multiplier^attempt`, capped at `max_backoff`, then perturbed by
/// ±25% when jitter is on. Never negative.
pub fn next_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let multiplier = policy.multiplier.max(1.0);
    let initial = policy.initial_backoff.as_secs_f64();
    let cap = policy.max_backoff.as_secs_f64();

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let mut delay = (initial * multiplier.powi(exponent)).min(cap);
    if !delay.is_finite() {
        delay = cap;
    }

    if policy.jitter && delay > 0.0 {
        let spread = delay * 0.25;
        delay += rand::thread_rng().gen_range(-spread..=spread);
    }

    Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(policy.max_backoff)
}

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_with_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Executes an async operation with retry logic.
///
/// Retries only errors accepted by [`is_retryable`], at most
/// `policy.max_retries` times. When cancellation interrupts a backoff sleep
/// the error from the preceding attempt is returned.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_retryable(&err) {
            debug!("{}: non-retryable error: {}", operation_name, err);
            return Err(err);
        }
        if attempt + 1 >= max_attempts {
            debug!(
                "{}: giving up after {} attempt(s): {}",
                operation_name, max_attempts, err
            );
            return Err(err);
        }

        let delay = next_delay(attempt, policy);
        warn!(
            "{}: attempt {}/{} failed ({}), retrying in {}ms...",
            operation_name,
            attempt + 1,
            max_attempts,
            err,
            delay.as_millis()
        );
        if sleep_with_cancel(delay, cancel).await.is_err() {
            return Err(err);
        }
        attempt += 1;
    }
}
