//! Bounded exponential backoff for confirming writes that land asynchronously.
//!
//! The caller fires a side effect (an HTTP call whose log row is written by a
//! separate ingestion path), then polls an idempotent check until it succeeds
//! or the budget runs out. The first check runs right away; each failure
//! doubles the wait before the next one. The budget is measured from the
//! start of the polling loop, not from the fire action.

use crate::config::ConfirmationConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("{message} (gave up after {attempts} attempts in {elapsed:?})")]
    TimedOut {
        message: String,
        attempts: u32,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConfirmation {
    initial_wait: Duration,
    max_wait: Duration,
}

impl Default for WriteConfirmation {
    fn default() -> Self {
        Self::from_config(&ConfirmationConfig::default())
    }
}

impl WriteConfirmation {
    pub fn new(initial_wait: Duration, max_wait: Duration) -> Self {
        Self {
            initial_wait,
            max_wait,
        }
    }

    pub fn from_config(cfg: &ConfirmationConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.initial_wait_ms),
            Duration::from_millis(cfg.max_wait_ms),
        )
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Await `fire`, then poll `operation` until it confirms.
    ///
    /// The fire result is returned alongside the confirmation result; a failed
    /// fire does not skip confirmation.
    pub async fn fire_and_confirm<FireFut, R, F, Fut, T, E>(
        &self,
        fire: FireFut,
        operation: F,
        failure_message: &str,
    ) -> (R, Result<T, ConfirmationError>)
    where
        FireFut: Future<Output = R>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let fired = fire.await;
        let confirmed = self.retry_until_confirmed(operation, failure_message).await;
        (fired, confirmed)
    }

    /// Try `operation`; on failure sleep, double the wait and try again.
    ///
    /// Each sleep is capped at the budget left, so the call returns no later
    /// than `max_wait` after it started plus the duration of the last attempt.
    pub async fn retry_until_confirmed<F, Fut, T, E>(
        &self,
        mut operation: F,
        failure_message: &str,
    ) -> Result<T, ConfirmationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let mut wait = self.initial_wait;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => {
                    tracing::debug!(attempt = attempts, "write confirmed");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::debug!(
                        attempt = attempts,
                        next_wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "write not yet visible, backing off"
                    );
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_wait {
                tracing::warn!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "{failure_message}"
                );
                return Err(ConfirmationError::TimedOut {
                    message: failure_message.to_string(),
                    attempts,
                    elapsed,
                });
            }

            tokio::time::sleep(wait.min(self.max_wait - elapsed)).await;
            wait = wait.saturating_mul(2);
        }
    }
}
