// Fixed-backoff retry for remote writes and git lock contention.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// Blocks the calling thread between attempts. Trait-based so tests can
/// record delays instead of sleeping.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// `attempts` tries with a fixed `backoff` between consecutive tries.
#[derive(Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    /// A policy with at least one attempt.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts: attempts.max(1), backoff, sleeper: Arc::new(ThreadSleeper) }
    }

    /// Run once, never retry.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `operation` until it succeeds, returns a non-retryable error, or
    /// attempts run out. The last error is returned unchanged.
    pub fn run<T, E, F, R>(&self, label: &str, mut operation: F, is_retryable: R) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempt < self.attempts && is_retryable(&error) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.attempts,
                        backoff_ms = self.backoff.as_millis() as u64,
                        %error,
                        "attempt failed, retrying"
                    );
                    self.sleeper.sleep(self.backoff);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
