//! Bounded exponential backoff with jitter for synchronous operations.

use std::thread;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = self.jitter.clamp(0.0, 1.0);
        let extra = (rand::random::<f64>() * factor * delay.as_millis() as f64) as u64;
        delay + Duration::from_millis(extra)
    }

    /// Runs `operation` until it succeeds, fails with an error `is_transient`
    /// rejects, or the attempt budget is spent. The closure receives the
    /// 1-based attempt number. The last error is returned on exhaustion.
    pub fn run<T, E, F, P>(&self, mut operation: F, is_transient: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && is_transient(&err) => {
                    let delay = self.jittered(self.backoff_for(attempt));
                    debug!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            jitter: 0.5,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(30), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> = fast_policy(5).run(
            |attempt| {
                calls += 1;
                if attempt < 3 {
                    Err("conflict".to_string())
                } else {
                    Ok(attempt)
                }
            },
            |_| true,
        );
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), String> = fast_policy(5).run(
            |_| {
                calls += 1;
                Err("exceeded".to_string())
            },
            |err| err == "conflict",
        );
        assert_eq!(result, Err("exceeded".to_string()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let result: Result<(), String> =
            fast_policy(4).run(|attempt| Err(format!("conflict #{attempt}")), |_| true);
        assert_eq!(result, Err("conflict #4".to_string()));
    }

    #[test]
    fn test_no_retry_runs_once() {
        let mut calls = 0;
        let _: Result<(), String> = RetryPolicy::no_retry().run(
            |_| {
                calls += 1;
                Err("conflict".to_string())
            },
            |_| true,
        );
        assert_eq!(calls, 1);
    }
}
