//! Wall-clock bounded retry strategies

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// How long to keep trying, and how long to wait between tries.
///
/// The sequence of attempts produced by [`RetryStrategy::start`] ends once the
/// next attempt would begin after `total` has elapsed. Delays are measured
/// from the start of the previous attempt, so time spent inside an attempt
/// counts towards the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// Upper bound on the time between `start()` and the last attempt
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub total: Duration,
    /// Minimum spacing between the starts of consecutive attempts
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub delay: Duration,
}

impl RetryStrategy {
    /// Create a strategy. Use [`validate`](Self::validate) on values that come
    /// from configuration.
    #[must_use]
    pub const fn new(total: Duration, delay: Duration) -> Self {
        Self { total, delay }
    }

    /// Short window for read-after-write lag: 5s total, 200ms apart.
    #[must_use]
    pub const fn short() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_millis(200))
    }

    /// Long window for slow asynchronous side effects such as address
    /// assignment: 3 minutes total, 5s apart.
    #[must_use]
    pub const fn long() -> Self {
        Self::new(Duration::from_secs(180), Duration::from_secs(5))
    }

    /// Reject strategies that cannot produce a useful attempt window.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.total.is_zero() {
            return Err(ConfigError::ZeroTotal);
        }
        if self.delay.is_zero() {
            return Err(ConfigError::ZeroDelay);
        }
        if self.delay > self.total {
            return Err(ConfigError::DelayExceedsTotal {
                delay: self.delay,
                total: self.total,
            });
        }
        Ok(())
    }

    /// Begin a new attempt sequence. The clock starts now.
    #[must_use]
    pub fn start(&self) -> Attempt {
        let now = Instant::now();
        Attempt {
            strategy: *self,
            end: now + self.total,
            last: now,
            count: 0,
        }
    }

    /// Run `op` until it succeeds, fails with an error `should_retry` rejects,
    /// or the strategy runs out of time. The last error is returned in the
    /// latter two cases.
    ///
    /// Only errors the predicate names are retried; everything else fails
    /// fast on the attempt that produced it.
    pub async fn retry_while<T, E, F, Fut, P>(&self, mut op: F, mut should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = self.start();
        // The first call never sleeps and always grants an attempt.
        attempt.next().await;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !should_retry(&err) || !attempt.next().await {
                return Err(err);
            }
            debug!(attempt = attempt.count(), "retrying after retryable error");
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::short()
    }
}

/// Cursor over the attempts of one [`RetryStrategy`] run.
#[derive(Debug)]
pub struct Attempt {
    strategy: RetryStrategy,
    end: Instant,
    last: Instant,
    count: u32,
}

impl Attempt {
    /// Wait for the next attempt slot.
    ///
    /// Returns `true` immediately on the first call. Later calls sleep out the
    /// rest of the delay and return `true`, unless the next attempt would start
    /// at or past the deadline, in which case they return `false` at once.
    pub async fn next(&mut self) -> bool {
        let now = Instant::now();
        if self.count == 0 {
            self.count = 1;
            self.last = now;
            return true;
        }

        let pause = self
            .strategy
            .delay
            .saturating_sub(now.saturating_duration_since(self.last));
        if now + pause >= self.end {
            return false;
        }
        if !pause.is_zero() {
            sleep(pause).await;
        }

        self.count += 1;
        self.last = Instant::now();
        true
    }

    /// Number of attempts granted so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The strategy this cursor was started from.
    #[must_use]
    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }
}
