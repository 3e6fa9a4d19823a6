//! Bounded retry and polling loops.
//!
//! Every wait in the coordinator goes through a [`RetryPolicy`] and a
//! [`Clock`], so attempt budgets are explicit and tests can run the loops
//! without sleeping.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `interval` between every attempt.
    Fixed,
    /// Double the wait after every failure, never exceeding `max`.
    Exponential { max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff: Backoff,
}

/// The last error of a retry loop that ran out of attempts.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    pub const fn exponential(max_attempts: u32, interval: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Exponential { max },
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max } => {
                let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.interval
                    .checked_mul(factor)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }

    /// Runs `op` until it succeeds or the attempt budget is spent. `op`
    /// receives the 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        what: &str,
        mut op: F,
    ) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= attempts => return Err(Exhausted { attempts, last }),
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Probes until `probe` yields a value. Probe errors count as "not yet".
    /// Returns the number of probes made when the budget runs out.
    pub async fn poll<T, E, F, Fut>(&self, clock: &dyn Clock, what: &str, mut probe: F) -> Result<T, u32>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match probe(attempt).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!("{}: not yet ({}/{})", what, attempt, attempts),
                Err(e) => debug!("{}: probe failed ({}/{}): {}", what, attempt, attempts, e),
            }
            if attempt < attempts {
                clock.sleep(self.delay_after(attempt)).await;
            }
        }
        warn!("{}: gave up after {} probes", what, attempts);
        Err(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingClock;

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let clock = RecordingClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));

        let result: Result<u32, Exhausted<String>> = policy
            .retry(&clock, "connect", |attempt| async move {
                if attempt < 2 {
                    Err(format!("refused {}", attempt))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn retry_respects_budget() {
        let clock = RecordingClock::default();
        let policy = RetryPolicy::fixed(3, Duration::from_secs(30));

        let mut calls = 0;
        let result: Result<(), _> = policy
            .retry(&clock, "connect", |_| {
                calls += 1;
                async { Err("refused") }
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last, "refused");
        assert_eq!(calls, 3);
        // no sleep after the final attempt
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn poll_treats_errors_as_not_ready() {
        let clock = RecordingClock::default();
        let policy = RetryPolicy::fixed(30, Duration::from_secs(10));

        let result = policy
            .poll(&clock, "readiness", |attempt| async move {
                match attempt {
                    1 => Err("channel closed"),
                    2 | 3 => Ok(None),
                    _ => Ok(Some("free")),
                }
            })
            .await;

        assert_eq!(result, Ok("free"));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 3]);
    }

    #[tokio::test]
    async fn poll_times_out() {
        let clock = RecordingClock::default();
        let policy = RetryPolicy::fixed(4, Duration::from_secs(10));

        let result: Result<(), u32> = policy
            .poll(&clock, "readiness", |_| async { Ok::<_, String>(None) })
            .await;

        assert_eq!(result, Err(4));
        assert_eq!(clock.total(), Duration::from_secs(30));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = (1..=5).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        assert_eq!(policy.delay_after(200), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(policy.attempts(), 1);
    }
}
