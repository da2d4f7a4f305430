//! Retry and timeout helpers
//!
//! Reconnection after a transport drop goes through [`retry_with_backoff`]
//! with the client's [`RetryConfig`]: exponential delays from
//! `initial_delay`, multiplied by `backoff_multiplier` after every failed
//! attempt, capped at `max_delay`, with ±10% jitter when enabled. Errors that
//! are not [recoverable](crate::ClientError::is_recoverable) end the loop at
//! once; cancellation is one of them.
//!
//! [`retry_with_backoff_or_wake`] runs the same loop but lets a [`Notify`]
//! cut the current backoff sleep short, which is how a network-reachability
//! signal makes a reconnecting client try again at once.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{ClientError, ClientResult};

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// # use rtstream_client_core::client::recovery::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::reconnect();
/// assert_eq!(config.max_attempts, 10);
/// assert_eq!(config.initial_delay, Duration::from_millis(500));
/// assert_eq!(config.max_delay, Duration::from_secs(10));
///
/// // Without jitter the schedule is deterministic
/// let fixed = RetryConfig { use_jitter: false, ..RetryConfig::reconnect() };
/// assert_eq!(fixed.delay_for_attempt(1), Duration::from_millis(500));
/// assert_eq!(fixed.delay_for_attempt(3), Duration::from_secs(2));
/// assert_eq!(fixed.delay_for_attempt(9), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

/// Backoff policy used while reconnecting
pub type ReconnectPolicy = RetryConfig;

impl Default for RetryConfig {
    fn default() -> Self {
        Self::reconnect()
    }
}

impl RetryConfig {
    /// Default policy for restoring a dropped session
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// Nominal delay after failed attempt `attempt` (1-based), before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = self.next_delay(delay);
            if delay >= self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.backoff_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let jitter = (rand::random::<f64>() - 0.5) * 0.2; // ±10% jitter
        let millis = delay.as_millis() as f64;
        Duration::from_millis((millis * (1.0 + jitter)) as u64)
    }
}

/// Retry an operation with exponential backoff
///
/// Retries while the error is recoverable and attempts remain. The last error
/// is returned once attempts run out.
///
/// # Examples
///
/// ```rust
/// # use rtstream_client_core::client::recovery::{retry_with_backoff, RetryConfig};
/// # use rtstream_client_core::ClientError;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() {
/// let config = RetryConfig { initial_delay: Duration::from_millis(1), ..RetryConfig::reconnect() };
/// let result: Result<(), ClientError> = retry_with_backoff("handshake", config, || async {
///     Err(ClientError::connection_failed(401, "Unauthorized"))
/// })
/// .await;
/// // Authentication failures are never retried
/// assert!(result.is_err());
/// # }
/// ```
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    retry_loop(operation_name, config, None, operation).await
}

/// [`retry_with_backoff`], except that `wake.notify_waiters()` ends the
/// backoff sleep in progress and starts the next attempt immediately.
///
/// A wake-up does not grant an extra attempt, and one that arrives while an
/// attempt is running is not remembered.
pub async fn retry_with_backoff_or_wake<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    wake: &Notify,
    operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    retry_loop(operation_name, config, Some(wake), operation).await
}

async fn retry_loop<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    wake: Option<&Notify>,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );

                let pause = sleep(config.jittered(delay));
                match wake {
                    Some(wake) => {
                        tokio::select! {
                            _ = pause => {}
                            _ = wake.notified() => {
                                debug!(operation = operation_name, attempt = attempt, "Backoff cut short");
                            }
                        }
                    }
                    None => pause.await,
                }
                delay = config.next_delay(delay);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    warn!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Bound a future by a timeout
pub async fn with_timeout<T, F>(
    operation_name: &str,
    timeout: Duration,
    future: F,
) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(ClientError::OperationTimeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
