use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Randomized pause between publish cycles, uniform in `[min, max]`
#[derive(Clone, Copy, Debug)]
pub struct JitterPacer {
    min: Duration,
    max: Duration,
}

impl JitterPacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        // An inverted range collapses to its lower bound
        let max = max.max(min);
        Self { min, max }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// No pause at all; used for one-shot and test runs
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Draw the next delay
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rng.random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Sleep for `delay`, returning early (and `false`) if `shutdown` fires
    pub async fn pause(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !shutdown.is_cancelled();
        }
        tokio::select! {
            _ = sleep(delay) => true,
            _ = shutdown.cancelled() => false,
        }
    }
}

impl Default for JitterPacer {
    fn default() -> Self {
        Self::from_millis(500, 2000)
    }
}
