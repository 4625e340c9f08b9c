//! Bounded retry with exponential backoff
//!
//! Wraps any fallible async operation. Intermediate failures are logged as
//! warnings; only the last attempt's error reaches the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

/// Default number of attempts
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default wait before the first retry
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_millis(250);

/// Default backoff multiplier
pub const DEFAULT_EXPONENT: f64 = 2.0;

/// Retry policy: `wait = base_wait * exponent^(attempt - 1)`, no jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_tries: u32,
    base_wait: Duration,
    exponent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            base_wait: DEFAULT_BASE_WAIT,
            exponent: DEFAULT_EXPONENT,
        }
    }
}

impl RetryPolicy {
    /// Create a policy. `max_tries` is clamped to at least one attempt; a
    /// negative or non-finite `exponent` falls back to a constant wait.
    pub fn new(max_tries: u32, base_wait: Duration, exponent: f64) -> Self {
        let exponent = if exponent.is_finite() && exponent >= 0.0 {
            exponent
        } else {
            1.0
        };
        Self {
            max_tries: max_tries.max(1),
            base_wait,
            exponent,
        }
    }

    /// A policy that runs the operation exactly once
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn base_wait(&self) -> Duration {
        self.base_wait
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    /// The sleeps taken between attempts when every attempt fails
    pub fn waits(&self) -> Vec<Duration> {
        let mut wait = self.base_wait;
        (1..self.max_tries)
            .map(|_| {
                let current = wait;
                wait = grow(wait, self.exponent);
                current
            })
            .collect()
    }

    /// Run `operation` until it succeeds or `max_tries` attempts have failed.
    ///
    /// The operation must be safe to run again after a failure.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut backoff = Backoff::new(self);
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => backoff.failed(name, err).await?,
            }
        }
    }

    /// Like [`RetryPolicy::run`], for operations that need mutable access to
    /// shared state between attempts (a rewindable reader, for instance).
    pub async fn run_with<S, T, E, F>(&self, name: &str, state: &mut S, operation: F) -> Result<T, E>
    where
        S: ?Sized,
        F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, Result<T, E>>,
        E: Display,
    {
        self.run_with_if(name, state, operation, |_| true).await
    }

    /// [`RetryPolicy::run_with`], except that errors rejected by `retryable`
    /// are returned at once without waiting.
    pub async fn run_with_if<S, T, E, F, P>(
        &self,
        name: &str,
        state: &mut S,
        mut operation: F,
        retryable: P,
    ) -> Result<T, E>
    where
        S: ?Sized,
        F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut backoff = Backoff::new(self);
        loop {
            match operation(&mut *state).await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) => backoff.failed(name, err).await?,
            }
        }
    }
}

/// Attempt counter and current wait for one `run` call
struct Backoff {
    max_tries: u32,
    exponent: f64,
    attempt: u32,
    wait: Duration,
}

impl Backoff {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            max_tries: policy.max_tries,
            exponent: policy.exponent,
            attempt: 0,
            wait: policy.base_wait,
        }
    }

    /// Record a failed attempt. Hands the error back once attempts are exhausted,
    /// otherwise warns and sleeps.
    async fn failed<E: Display>(&mut self, name: &str, err: E) -> Result<(), E> {
        self.attempt += 1;
        if self.attempt >= self.max_tries {
            return Err(err);
        }

        tracing::warn!(
            operation = name,
            attempt = self.attempt,
            error = %err,
            "{} failed due to {} (try {})",
            name,
            err,
            self.attempt
        );

        tokio::time::sleep(self.wait).await;
        self.wait = grow(self.wait, self.exponent);
        Ok(())
    }
}

/// Next wait, saturating at `Duration::MAX`
fn grow(wait: Duration, exponent: f64) -> Duration {
    Duration::try_from_secs_f64(wait.as_secs_f64() * exponent).unwrap_or(Duration::MAX)
}
