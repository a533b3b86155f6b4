//! Unlimited retry with exponential backoff.
//!
//! Every retry body reports the outcome of one attempt as an [`Attempt`]: the
//! loop keeps going on [`Attempt::Retry`] for as long as the caller does not
//! cancel, and stops on [`Attempt::Done`] or [`Attempt::Fatal`].

use std::time::Duration;

use async_trait::async_trait;
use kjob_config::RetryConfig;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::prelude::*;

/// Outcome of one retry-body call.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Finished, stop retrying.
    Done(T),
    /// Transient condition, try again after the next interval.
    Retry(String),
    /// Permanent failure, stop retrying.
    Fatal(Error),
}

/// Generator of the waits between attempts.
pub trait Interval: Send {
    /// Wait before the next attempt.
    fn next_interval(&mut self) -> Duration;
    /// Start over from the first wait.
    fn reset(&mut self);
}

/// Exponential backoff without attempt or elapsed-time limit.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max_interval: Duration,
    randomization_factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        let initial = Duration::from_millis(config.initial_interval_ms.max(1));
        Self {
            initial,
            multiplier: config.multiplier.max(1.0),
            max_interval: Duration::from_millis(config.max_interval_ms).max(initial),
            randomization_factor: config.randomization_factor.clamp(0.0, 0.99),
            current: initial,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl Interval for ExponentialBackoff {
    fn next_interval(&mut self) -> Duration {
        let base = self.current;
        self.current = base.mul_f64(self.multiplier).min(self.max_interval);
        randomize(base, self.randomization_factor)
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

fn randomize(base: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return base;
    }
    let base = base.as_secs_f64();
    let delta = base * factor;
    Duration::from_secs_f64(rand::thread_rng().gen_range((base - delta)..=(base + delta)))
}

/// Body of a retry loop.
#[async_trait]
pub trait RetryBody: Send {
    /// Value produced by a successful attempt.
    type Output: Send;

    /// Run one attempt.
    async fn attempt(&mut self) -> Attempt<Self::Output>;
}

/// Sleep for `wait` unless `cancel` fires first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, wait: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

/// Call `body` until it is done or fails permanently, waiting `interval`
/// between attempts.
///
/// Cancellation interrupts both an ongoing attempt and a wait and returns
/// [`Error::Cancelled`].
pub async fn with_interval<B>(
    cancel: &CancellationToken,
    interval: &mut dyn Interval,
    body: &mut B,
) -> Result<B::Output>
where
    B: RetryBody + ?Sized,
{
    interval.reset();
    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            attempt = body.attempt() => attempt,
        };
        match attempt {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retry(reason) => {
                let wait = interval.next_interval();
                debug!("{reason}, retrying in {wait:?}");
                sleep_or_cancel(cancel, wait).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(&RetryConfig {
            initial_interval_ms: initial_ms,
            multiplier: 2.0,
            max_interval_ms: max_ms,
            randomization_factor: 0.0,
        })
    }

    struct Flaky {
        retries_left: usize,
        attempts: usize,
        fatal: bool,
    }

    #[async_trait]
    impl RetryBody for Flaky {
        type Output = usize;

        async fn attempt(&mut self) -> Attempt<usize> {
            self.attempts += 1;
            if self.retries_left > 0 {
                self.retries_left -= 1;
                return Attempt::Retry(String::from("not yet"));
            }
            if self.fatal {
                return Attempt::Fatal(Error::WatcherLost);
            }
            Attempt::Done(self.attempts)
        }
    }

    #[test]
    fn backoff_grows_until_cap() {
        let mut backoff = fixed(100, 500);
        let waits: Vec<u64> = (0..6)
            .map(|_| backoff.next_interval().as_millis() as u64)
            .collect();
        assert_eq!(waits, vec![100, 200, 400, 500, 500, 500]);

        backoff.reset();
        assert_eq!(backoff.next_interval(), Duration::from_millis(100));
    }

    #[test]
    fn randomized_backoff_stays_in_range() {
        let mut backoff = ExponentialBackoff::new(&RetryConfig {
            initial_interval_ms: 1000,
            multiplier: 1.0,
            max_interval_ms: 1000,
            randomization_factor: 0.5,
        });
        for _ in 0..100 {
            let wait = backoff.next_interval();
            assert!(wait >= Duration::from_millis(500) && wait <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_done() {
        let cancel = CancellationToken::new();
        let mut body = Flaky {
            retries_left: 5,
            attempts: 0,
            fatal: false,
        };
        let attempts = with_interval(&cancel, &mut fixed(10, 1000), &mut body)
            .await
            .unwrap();
        assert_eq!(attempts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_stops_the_loop() {
        let cancel = CancellationToken::new();
        let mut body = Flaky {
            retries_left: 1,
            attempts: 0,
            fatal: true,
        };
        let err = with_interval(&cancel, &mut fixed(10, 1000), &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WatcherLost));
        assert_eq!(body.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let mut body = Flaky {
            retries_left: usize::MAX,
            attempts: 0,
            fatal: false,
        };
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            canceller.cancel();
        });
        let err = with_interval(&cancel, &mut fixed(1000, 60_000), &mut body)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(body.attempts > 1);
    }

    #[tokio::test]
    async fn sleep_returns_cancelled_when_token_fired() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = sleep_or_cancel(&cancel, Duration::from_secs(3600)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
