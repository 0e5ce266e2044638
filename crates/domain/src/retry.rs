//! Bounded exponential backoff

use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether another attempt might succeed
pub trait Transient {
    fn is_transient(&self) -> bool;

    /// Server-provided wait hint, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Retry policy: `max_attempts` total tries, waiting
/// `base_delay * multiplier^(n-1)` (capped at `max_delay`) after the n-th failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// The error that ended a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made, including the failing one
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// A server wait hint longer than `max_delay` ends the run at once, since
    /// an earlier retry would only be refused again.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Transient + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let hint = error.retry_after();
                    if let Some(hint) = hint.filter(|hint| *hint > self.max_delay) {
                        tracing::warn!(
                            operation = %label,
                            attempt,
                            retry_after_secs = hint.as_secs(),
                            max_delay_secs = self.max_delay.as_secs(),
                            error = %error,
                            "Server asked to wait longer than the retry budget allows, giving up"
                        );
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }

                    let wait = hint
                        .map(|hint| hint.max(self.delay_for(attempt)))
                        .unwrap_or_else(|| self.delay_for(attempt))
                        .min(self.max_delay);

                    tracing::warn!(
                        operation = %label,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );

                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
        retry_after: Option<Duration>,
    }

    impl TestError {
        fn transient() -> Self {
            Self {
                transient: true,
                retry_after: None,
            }
        }

        fn permanent() -> Self {
            Self {
                transient: false,
                retry_after: None,
            }
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }

        fn retry_after(&self) -> Option<Duration> {
            self.retry_after
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .run("test", |_| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::transient())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = policy
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::transient())
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::default()
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::permanent())
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_hint_is_honoured() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run("test", |_| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TestError {
                        transient: true,
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_beyond_max_delay_gives_up_without_waiting() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = RetryPolicy::default()
            .run("test", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError {
                    transient: true,
                    retry_after: Some(Duration::from_secs(300)),
                })
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(failure.error.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
