use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with linear backoff: the wait after attempt `n` is `base * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Attempt numbers, starting at 1.
    pub fn attempts(&self) -> impl Iterator<Item = u32> {
        1..=self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Sleep before the next attempt; no-op after the last one.
    pub async fn pause(&self, attempt: u32) {
        if self.is_last(attempt) {
            return;
        }
        let delay = self.delay_after(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the
    /// last error.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(op, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but gives up early on errors for which
    /// `retryable` returns false.
    pub async fn run_if<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.is_last(attempt) || !retryable(&err) => return Err(err),
                Err(err) => {
                    debug!(attempt, %err, "attempt failed");
                    self.pause(attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delay_grows_linearly() {
        let p = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.attempts().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn run_stops_at_first_success() {
        let calls = Cell::new(0);
        let p = RetryPolicy::new(5, Duration::from_millis(1));
        let out: Result<u32, String> = p
            .run(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 2 {
                        Err("nope".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn run_if_skips_permanent_errors() {
        let calls = Cell::new(0);
        let p = RetryPolicy::new(4, Duration::from_millis(1));
        let out: Result<(), String> = p
            .run_if(
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err("forbidden".to_string()) }
                },
                |err| err != "forbidden",
            )
            .await;
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn run_returns_last_error() {
        let p = RetryPolicy::new(3, Duration::from_millis(1));
        let out: Result<(), String> = p.run(|attempt| async move { Err(format!("fail {attempt}")) }).await;
        assert_eq!(out, Err("fail 3".to_string()));
    }
}
