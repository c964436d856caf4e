//! Bounded exponential-backoff retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(31) as i32);
        let scaled = self.initial_delay.as_nanos() as f64 * factor;
        if scaled >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(scaled as u64)
        }
    }
}

/// Whether a sqlx error is worth retrying.
///
/// SQLSTATE classes: 40001 serialization_failure, 40P01 deadlock_detected,
/// 57P01..03 shutdown / cannot connect now, 08xxx connection exceptions.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().map_or(false, |code| {
            matches!(&*code, "40001" | "40P01" | "57P01" | "57P02" | "57P03")
                || code.starts_with("08")
        }),
        _ => false,
    }
}

/// Whether a failed write is known not to have been applied.
///
/// A dropped connection (`Io`, `Tls`, a crashed worker) may arrive after the
/// server committed, so only pool checkout timeouts and errors the server
/// reported as a rollback or refused connection qualify.
pub fn is_retryable_write(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(_) => is_transient(error),
        _ => false,
    }
}

/// Runs a read until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    retry_while(config, operation_name, is_transient, operation).await
}

/// Like [`with_retry`], for statements that must not be applied twice.
pub async fn with_write_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    retry_while(config, operation_name, is_retryable_write, operation).await
}

async fn retry_while<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: fn(&sqlx::Error) -> bool,
    mut operation: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if retryable(&e) && attempt + 1 < config.max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if is_transient(&e) {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Store operation failed, no more retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
