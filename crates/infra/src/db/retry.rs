use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::DatabaseConfig;

/// Errors that may succeed when the same operation is retried.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
            _ => false,
        }
    }
}

/// SQLSTATE classes PostgreSQL reports for retryable conditions.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(
        code,
        // serialization_failure, deadlock_detected
        "40001" | "40P01"
        // too_many_connections, cannot_connect_now, admin/crash shutdown
        | "53300" | "57P03" | "57P01" | "57P02"
    ) || code.starts_with("08")
}

/// Retries an operation on transient failures with capped exponential backoff.
///
/// Mirrors "retry on failure" semantics of a database execution strategy: the
/// whole operation (e.g. an entire transaction) is re-run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionStrategy {
    max_retry_count: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExecutionStrategy {
    pub const DEFAULT_MAX_RETRY_COUNT: u32 = 6;

    pub fn new(max_retry_count: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retry_count,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            config.max_retry_count,
            Duration::from_secs(1),
            config.max_retry_delay(),
        )
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// `base * 2^retry` capped at `max_delay`, scaled by a random factor in `[1.0, 1.1]`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(16) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(1.0..=1.1);
        Duration::from_secs_f64(capped * jitter).min(self.max_delay)
    }

    pub async fn execute<T, E, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, E>
    where
        E: Transient + core::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retry = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry < self.max_retry_count => {
                    let delay = self.delay_for_retry(retry);
                    retry += 1;
                    warn!(
                        operation,
                        retry,
                        max_retries = self.max_retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient database failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_RETRY_COUNT,
            Duration::from_secs(1),
            Duration::from_secs(30),
        )
    }
}
