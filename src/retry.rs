//! Retry utilities for remote operations.
//!
//! Three shapes of failure handling live here:
//!
//! - [`retry_with_backoff`]: plain transport retries with exponential backoff
//!   and jitter, used by executors for flaky SSH connections.
//! - [`retry_with_compensation`]: a bounded attempt loop that runs a
//!   compensating action between failed attempts. Used for `kubeadm init` and
//!   `kubeadm join`, where a failed attempt leaves partial state on the host
//!   that `kubeadm reset` must clear before the next try.
//! - [`best_effort`]: discard an error on purpose, with a log line, for
//!   cleanup and cosmetic steps whose failure must not mask the primary error.
//!
//! # Example
//!
//! ```ignore
//! use kubeweave::retry::{retry_with_compensation, best_effort};
//!
//! let output = retry_with_compensation(
//!     3,
//!     "init kubernetes cluster",
//!     || session.run(INIT_CMD),
//!     || async { best_effort("kubeadm reset", session.run(RESET_CMD).await); },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Number of attempts for kubeadm init/join before giving up
pub const KUBEADM_ATTEMPTS: u32 = 3;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries until success or until `max_attempts` is reached, returning the
/// last error in that case.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    if config.max_attempts > 1 {
                        error!(
                            operation = %operation_name,
                            attempt = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                    }
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Run `attempt` up to `attempts` times, running `compensate` after every
/// failure except the last.
///
/// The compensation is awaited before the next attempt starts. It returns
/// `()`: callers that can fail during compensation wrap it in
/// [`best_effort`]. When every attempt fails, the last error is returned
/// inside [`Error::RetryExhausted`].
pub async fn retry_with_compensation<A, AFut, C, CFut, T>(
    attempts: u32,
    operation_name: &str,
    mut attempt: A,
    mut compensate: C,
) -> Result<T, Error>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T, Error>>,
    C: FnMut() -> CFut,
    CFut: Future<Output = ()>,
{
    let attempts = attempts.max(1);
    let mut n = 0u32;

    loop {
        n += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if n >= attempts => {
                error!(
                    operation = %operation_name,
                    attempt = n,
                    error = %e,
                    "Giving up"
                );
                return Err(Error::RetryExhausted {
                    operation: operation_name.to_string(),
                    attempts: n,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    operation = %operation_name,
                    attempt = n,
                    error = %e,
                    "Attempt failed, compensating before retry"
                );
                compensate().await;
            }
        }
    }
}

/// Discard the error of a step whose failure is acceptable.
///
/// Returns the value on success. On failure logs the error at `warn` and
/// returns `None`.
pub fn best_effort<T>(operation: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation = %operation, error = %e, "Ignoring failure of best-effort step");
            None
        }
    }
}
