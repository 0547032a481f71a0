//! ---
//! upkeep_section: "02-scheduling-runtime"
//! upkeep_subsection: "module"
//! upkeep_type: "source"
//! upkeep_scope: "code"
//! upkeep_description: "Runtime helpers supporting the update orchestrator."
//! upkeep_version: "v0.0.0-prealpha"
//! upkeep_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

/// Smallest period accepted by [`RateLimiter::new`]; tokio rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Async pacer that wakes at a fixed cadence without bursting after stalls.
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { period, interval }
    }

    /// Effective period after clamping.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick. The first tick completes immediately.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_clamped() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let limiter = runtime.block_on(async { RateLimiter::new(Duration::ZERO) });
        assert_eq!(limiter.period(), MIN_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_the_period() {
        let mut limiter = RateLimiter::new(Duration::from_millis(50));
        let first = limiter.tick().await;
        let second = limiter.tick().await;
        assert_eq!(second - first, Duration::from_millis(50));
    }
}
