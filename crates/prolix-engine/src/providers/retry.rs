use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::ProviderError;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4);

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Retries timeouts and transient failures with linear backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    sleeper: Sleeper,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_backoff", &self.base_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            sleeper: Arc::new(thread::sleep),
        }
    }

    pub fn with_sleeper<F>(mut self, sleeper: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(retry.max(1))
            .min(self.max_backoff)
    }

    /// Runs `op` once plus up to `max_retries` retries. `op` receives the
    /// zero-based attempt index.
    pub fn run<T, F>(&self, provider: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Result<T, ProviderError>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            provider,
                            attempts = attempt + 1,
                            error = %err,
                            "provider retry budget exhausted"
                        );
                        return Err(ProviderError::Unavailable {
                            attempts: attempt + 1,
                            last_error: err.to_string(),
                        });
                    }
                    attempt += 1;
                    let delay = self.backoff_for(attempt);
                    tracing::warn!(
                        provider,
                        retry = attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying provider call after transient failure"
                    );
                    (self.sleeper)(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_policy(max_retries: u32) -> (RetryPolicy, Arc<Mutex<Vec<Duration>>>) {
        let slept = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&slept);
        let policy = RetryPolicy::new(max_retries).with_sleeper(move |delay| {
            if let Ok(mut slept) = sink.lock() {
                slept.push(delay);
            }
        });
        (policy, slept)
    }

    #[test]
    fn transient_then_success_retries_once() {
        let (policy, slept) = recording_policy(2);
        let mut calls = 0;
        let result = policy.run("test", |_| {
            calls += 1;
            if calls == 1 {
                Err(ProviderError::Transient("429".into()))
            } else {
                Ok("ok")
            }
        });
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls, 2);
        assert_eq!(
            slept.lock().map(|s| s.clone()).unwrap_or_default(),
            vec![Duration::from_millis(500)]
        );
    }

    #[test]
    fn non_transient_error_is_not_retried() {
        let (policy, slept) = recording_policy(2);
        let mut calls = 0;
        let result: Result<(), _> = policy.run("test", |_| {
            calls += 1;
            Err(ProviderError::Rejected("401 invalid key".into()))
        });
        assert_eq!(result, Err(ProviderError::Rejected("401 invalid key".into())));
        assert_eq!(calls, 1);
        assert!(slept.lock().map(|s| s.is_empty()).unwrap_or(false));
    }

    #[test]
    fn content_disallowed_is_not_retried() {
        let (policy, _) = recording_policy(5);
        let mut calls = 0;
        let result: Result<(), _> = policy.run("test", |_| {
            calls += 1;
            Err(ProviderError::ContentDisallowed("refusal".into()))
        });
        assert!(matches!(result, Err(ProviderError::ContentDisallowed(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhaustion_reports_unavailable_after_all_attempts() {
        let (policy, slept) = recording_policy(2);
        let mut seen = Vec::new();
        let result: Result<(), _> = policy.run("test", |attempt| {
            seen.push(attempt);
            Err(ProviderError::Timeout("20s elapsed".into()))
        });
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(
            result,
            Err(ProviderError::Unavailable {
                attempts: 3,
                last_error: "request timed out: 20s elapsed".into()
            })
        );
        assert_eq!(
            slept.lock().map(|s| s.clone()).unwrap_or_default(),
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let (policy, _) = recording_policy(0);
        let mut calls = 0;
        let result: Result<(), _> = policy.run("test", |_| {
            calls += 1;
            Err(ProviderError::Transient("502".into()))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.map_err(|err| err.attempts()), Err(1));
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(8), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(50), Duration::from_secs(4));
    }
}
