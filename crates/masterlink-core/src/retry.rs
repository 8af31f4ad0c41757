//! Retry policy shared by every retry loop in the relay.
//!
//! A policy bounds how many times an operation is attempted, how long each
//! attempt may take, and how long to wait between attempts. Loops own their
//! attempt counter; the policy itself is immutable and cheap to copy.

use std::future::Future;
use std::io;
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every failed attempt.
    Fixed(Duration),
    /// Doubles after every failed attempt, starting at `base`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

/// Attempt limit, backoff schedule, and per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// A bounded policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Backoff::Fixed(delay),
            attempt_timeout,
        }
    }

    /// A policy that never gives up, waiting `delay` between attempts.
    pub fn unbounded(delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
            attempt_timeout,
        }
    }

    /// Switch to exponential backoff starting at `base`, capped at `max`.
    pub fn with_exponential_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = Backoff::Exponential { base, max };
        self
    }

    /// Whether `attempt` (1-based) is within the budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Whether `attempt` (1-based) is the last one the budget allows.
    pub fn is_last(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }

    /// Run `fut` bounded by the per-attempt timeout.
    ///
    /// An elapsed timeout surfaces as `io::ErrorKind::TimedOut` so callers
    /// can treat it like any other I/O failure.
    pub async fn timed<T, F>(&self, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match tokio::time::timeout(self.attempt_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {:?}", self.attempt_timeout),
            )),
        }
    }
}
