use std::sync::{Arc, Condvar, Mutex};
use std::thread::sleep;
use std::time::Duration;

use http::Method;
use rand::RngExt;
use tracing::{debug, warn};

use crate::error::Error;
use crate::util::lock_unpoisoned;

const DEFAULT_JITTER: Duration = Duration::from_millis(20);

/// How persistently a request is retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryMode {
    #[default]
    Once,
    Short,
    Enduring,
}

impl RetryMode {
    pub const fn policy(self) -> RetryPolicy {
        match self {
            Self::Once => RetryPolicy::once(),
            Self::Short => RetryPolicy::short(),
            Self::Enduring => RetryPolicy::enduring(),
        }
    }
}

/// Attempt budget and backoff shape.
///
/// The wait before retry `n` (1-based) is `min(backoff_base^n ms, backoff_cap)` plus a uniformly
/// sampled jitter in `[0, jitter]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff_base: f64,
    backoff_cap: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: 2.0,
            backoff_cap: Duration::ZERO,
            jitter: DEFAULT_JITTER,
        }
    }

    pub const fn short() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: 2.0,
            backoff_cap: Duration::from_millis(500),
            jitter: DEFAULT_JITTER,
        }
    }

    pub const fn enduring() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            backoff_cap: Duration::from_millis(5000),
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff_base(mut self, backoff_base: f64) -> Self {
        self.backoff_base = if backoff_base.is_finite() {
            backoff_base.max(1.0)
        } else {
            2.0
        };
        self
    }

    pub fn backoff_cap(mut self, backoff_cap: Duration) -> Self {
        self.backoff_cap = backoff_cap;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts_value(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff_cap_value(&self) -> Duration {
        self.backoff_cap
    }

    pub fn jitter_value(&self) -> Duration {
        self.jitter
    }

    /// Capped exponential part of the wait before retry `retry_index`.
    pub fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let exponent = retry_index.min(i32::MAX as usize) as i32;
        let raw_ms = self.backoff_base.powi(exponent);
        let cap_ms = self.backoff_cap.as_secs_f64() * 1000.0;
        let delay_ms = raw_ms.min(cap_ms).max(0.0);
        Duration::from_micros((delay_ms * 1000.0).round() as u64)
    }

    pub fn delay_for_retry(&self, retry_index: usize) -> Duration {
        self.backoff_for_retry(retry_index) + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let jitter_us = self.jitter.as_micros().min(u64::MAX as u128) as u64;
        if jitter_us == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_micros(rng.random_range(0..=jitter_us))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Caller-held stop signal, observed between attempts and during backoff waits.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        *cancelled = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.cancelled)
    }

    /// Blocks for up to `timeout`; returns `true` if cancellation was requested before or
    /// during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let cancelled = lock_unpoisoned(&self.inner.cancelled);
        let (cancelled, _) = match self
            .inner
            .condvar
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled
    }
}

/// Runs one fallible call up to `max_attempts` times.
///
/// `Ok(None)` from the operation counts as a failed attempt, the same as a retryable error.
/// Non-retryable errors end the loop immediately. On exhaustion the last failure is returned.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancellation: Option<CancellationToken>,
    method: Method,
    uri: String,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, method: Method, uri: impl Into<String>) -> Self {
        Self {
            policy,
            cancellation: None,
            method,
            uri: uri.into(),
        }
    }

    pub fn cancellation(mut self, cancellation: Option<CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn run<T, F>(&self, mut operation: F) -> crate::Result<T>
    where
        F: FnMut() -> crate::Result<Option<T>>,
    {
        let max_attempts = self.policy.max_attempts_value();
        let mut attempt = 1_usize;

        loop {
            if self.is_cancelled() {
                return Err(self.cancelled_error());
            }

            let failure = match operation() {
                Ok(Some(value)) => {
                    debug!(
                        method = %self.method,
                        uri = %self.uri,
                        attempt,
                        "http call succeeded"
                    );
                    return Ok(value);
                }
                Ok(None) => Error::EmptyResponse {
                    method: self.method.clone(),
                    uri: self.uri.clone(),
                },
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error,
            };

            if attempt >= max_attempts {
                if max_attempts > 1 {
                    warn!(
                        method = %self.method,
                        uri = %self.uri,
                        attempts = attempt,
                        error = %failure,
                        "giving up after exhausting retry attempts"
                    );
                }
                return Err(failure);
            }

            let delay = self.policy.delay_for_retry(attempt);
            debug!(
                method = %self.method,
                uri = %self.uri,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "http call failed; retrying"
            );
            if self.wait(delay) {
                return Err(self.cancelled_error());
            }
            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn wait(&self, delay: Duration) -> bool {
        match &self.cancellation {
            Some(cancellation) => cancellation.wait_timeout(delay),
            None => {
                if !delay.is_zero() {
                    sleep(delay);
                }
                false
            }
        }
    }

    fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            method: self.method.clone(),
            uri: self.uri.clone(),
        }
    }
}
