//! Interface to the durable workflow engine.
//!
//! The hosted engine schedules workflows, persists their state, and calls
//! back into the activities this crate registers. What lives here is the
//! part of that contract the worker owns: retry envelopes, activity
//! timeouts, heartbeating, and the classification that keeps
//! customer-visible failures from being retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use fabra_data::customer_visible_message;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Task queue the worker binary listens on.
pub const SYNC_TASK_QUEUE: &str = "SYNC_TASK_QUEUE";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    pub maximum_attempts: u32,
    /// When set, errors carrying a customer-visible message fail the
    /// activity immediately: retrying a bad configuration cannot fix it.
    pub non_retryable_customer_errors: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ActivityOptions {
    pub start_to_close_timeout: Duration,
    /// Missing a heartbeat for this long marks the worker crashed; enforced
    /// by the engine, carried here as part of the activity's envelope.
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

/// Liveness pulse sink. The hosted engine resets the heartbeat timeout on
/// every pulse; the in-process engine counts them for tests.
pub trait Heartbeat: Send + Sync {
    fn record_heartbeat(&self);
}

#[derive(Debug, Default)]
pub struct NoopHeartbeat;

impl Heartbeat for NoopHeartbeat {
    fn record_heartbeat(&self) {}
}

/// Per-invocation activity context: cancellation fans out to connector I/O,
/// the heartbeat handle reaches the engine.
#[derive(Clone)]
pub struct ActivityContext {
    pub heartbeat: Arc<dyn Heartbeat>,
    pub cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(heartbeat: Arc<dyn Heartbeat>, cancellation: CancellationToken) -> Self {
        Self {
            heartbeat,
            cancellation,
        }
    }

    pub fn for_testing() -> Self {
        Self {
            heartbeat: Arc::new(NoopHeartbeat),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Runs one activity under its options: start-to-close timeout per attempt,
/// exponential backoff between attempts, attempt cap, and the
/// customer-visible short-circuit.
pub async fn execute_activity<T, F, Fut>(
    options: &ActivityOptions,
    label: &str,
    mut activity: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut backoff = options.retry.initial_interval;

    loop {
        attempt += 1;

        let error = match tokio::time::timeout(options.start_to_close_timeout, activity()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => anyhow!("{label} exceeded its start-to-close timeout"),
        };

        let visible = customer_visible_message(&error).is_some();
        if options.retry.non_retryable_customer_errors && visible {
            return Err(error);
        }
        if attempt >= options.retry.maximum_attempts {
            return Err(error);
        }

        warn!(activity = label, attempt, error = %error, "activity failed, retrying");
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(
            backoff.mul_f64(options.retry.backoff_coefficient),
            options.retry.maximum_interval,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_options(maximum_attempts: u32, non_retryable_customer_errors: bool) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_millis(200),
            heartbeat_timeout: None,
            retry: RetryPolicy {
                initial_interval: Duration::from_millis(1),
                backoff_coefficient: 2.0,
                maximum_interval: Duration::from_millis(5),
                maximum_attempts,
                non_retryable_customer_errors,
            },
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let result = execute_activity(&fast_options(3, false), "Test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    anyhow::bail!("transient");
                }
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_maximum_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = execute_activity(&fast_options(3, false), "Test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("still broken") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn customer_visible_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = execute_activity(&fast_options(3, true), "Replicate", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(fabra_data::customer_visible("bad credentials")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn customer_visible_errors_still_retry_when_allowed() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = execute_activity(&fast_options(2, false), "FetchConfig", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(fabra_data::customer_visible("flaky config store")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeouts_count_as_attempts() {
        let mut options = fast_options(2, false);
        options.start_to_close_timeout = Duration::from_millis(10);

        let attempts = AtomicU32::new(0);
        let result: Result<()> = execute_activity(&options, "Slow", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
