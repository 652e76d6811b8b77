// 10.1: rate limiting for ticks and reconnect pacing.

use std::time::Duration;
use tokio::time::Instant;

/// Accepts at most one update per interval. Later updates inside the
/// window are dropped, not delayed.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Reconnect delay: `min(base * multiplier^failures, max)` where
/// `failures` counts consecutive failed connects. A clean disconnect after
/// a good session waits `base`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: u32,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn delay(&self) -> Duration {
        self.multiplier
            .checked_pow(self.failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
