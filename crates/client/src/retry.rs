//! Bounded retry of transient faults
//!
//! Every call runs against a fixed [`Deadline`] computed before the first
//! attempt. Each attempt is handed whatever budget remains, so total
//! latency stays bounded no matter how many retries happen.
//!
//! Only errors classified as retryable by [`Error::is_retryable`] are
//! re-issued. Conditional failures and aborted batches are results, not
//! errors, so they never reach this loop.

use shardline_core::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Absolute deadline of one call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            at: start + timeout,
            timeout,
        }
    }

    /// Budget left, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the budget is used up
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time since the deadline was set
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Original budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Value returned by a retried call with the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    /// Result of the successful attempt
    pub value: T,
    /// Attempts made, including the successful one
    pub attempts: usize,
}

/// Run `attempt` until it succeeds, fails permanently, or runs out of
/// retries or budget.
///
/// `attempt` receives the zero-based attempt number and must re-issue the
/// identical call each time.
///
/// # Errors
///
/// The error of the last attempt. Non-retryable errors are returned
/// immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    deadline: &Deadline,
    mut attempt: F,
) -> Result<RetryOutcome<T>>
where
    F: FnMut(usize) -> Result<T>,
{
    let mut retries = 0;
    loop {
        match attempt(retries) {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: retries + 1,
                })
            }
            Err(e) if should_retry(&e, retries, config, deadline) => {
                let delay = config.retry_delay().min(deadline.remaining());
                debug!(
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    remaining_ms = deadline.remaining().as_millis() as u64,
                    error = %e,
                    "Retrying after transient fault"
                );
                std::thread::sleep(delay);
                retries += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(attempts = retries + 1, error = %e, "Transient fault not retried");
                }
                return Err(e);
            }
        }
    }
}

fn should_retry(error: &Error, retries: usize, config: &RetryConfig, deadline: &Deadline) -> bool {
    error.is_retryable()
        && retries < config.max_retries
        && deadline.remaining() > config.min_remaining()
}
