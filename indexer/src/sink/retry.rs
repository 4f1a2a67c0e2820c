use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::SinkError;

pub const DEFAULT_RETRY_ON_STATUS: [u16; 4] = [429, 502, 503, 504];
pub const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// How a single attempt ended when it did not produce a value.
#[derive(Debug)]
pub enum Attempt {
    Retryable(String),
    Failed(SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_on_status: Vec<u16>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_on_status: DEFAULT_RETRY_ON_STATUS.to_vec(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Delay before the given retry (1-based): doubles each time, capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Runs `attempt` until it succeeds, fails for good, or the retry budget is spent.
    pub fn execute<T, F>(&self, url: &str, mut attempt: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Result<T, Attempt>,
    {
        let mut retries = 0u32;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(Attempt::Failed(err)) => return Err(err),
                Err(Attempt::Retryable(reason)) => {
                    if retries >= self.max_retries {
                        return Err(SinkError::Transient {
                            url: url.to_string(),
                            attempts: retries + 1,
                            reason,
                        });
                    }
                    retries += 1;
                    let delay = self.backoff(retries);
                    warn!(
                        url,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "retrying request"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(30), Duration::from_secs(10));
    }

    #[test]
    fn default_statuses_cover_rate_limits_and_gateway_errors() {
        let policy = RetryPolicy::default();
        for status in [429, 502, 503, 504] {
            assert!(policy.should_retry_status(status));
        }
        assert!(!policy.should_retry_status(400));
        assert!(!policy.should_retry_status(500));
    }

    #[test]
    fn recovers_after_transient_failures() {
        let mut calls = 0;
        let result = fast_policy(3).execute("http://sink/_bulk", || {
            calls += 1;
            if calls < 3 {
                Err(Attempt::Retryable("status 503".into()))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.expect("should succeed"), 3);
    }

    #[test]
    fn gives_up_when_budget_is_spent() {
        let mut calls = 0;
        let err = fast_policy(2)
            .execute::<(), _>("http://sink/_bulk", || {
                calls += 1;
                Err(Attempt::Retryable("status 429".into()))
            })
            .expect_err("should fail");

        assert_eq!(calls, 3);
        assert!(matches!(err, SinkError::Transient { attempts: 3, .. }));
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let mut calls = 0;
        let err = fast_policy(5)
            .execute::<(), _>("http://sink/health", || {
                calls += 1;
                Err(Attempt::Failed(SinkError::Closed))
            })
            .expect_err("should fail");

        assert_eq!(calls, 1);
        assert!(matches!(err, SinkError::Closed));
    }
}
