//! Wall-clock limit for a minimizer run, checked every few calls.
//!
//! Reading the clock on every objective evaluation is wasteful for cheap
//! models, so the clock is only read every `interval` calls. The interval
//! adapts to how long calls take: it halves after a check that found more than
//! a second elapsed since the previous one and grows by half after a check
//! that found no whole second elapsed.

use std::time::{Duration, Instant};

pub const INITIAL_CHECK_INTERVAL: usize = 10;
pub const MIN_CHECK_INTERVAL: usize = 2;

#[derive(Debug, Clone)]
pub struct TimeoutClock {
    limit: Duration,
    started: Instant,
    last_check: Instant,
    interval: usize,
    calls: usize,
}

impl TimeoutClock {
    pub fn new(limit: Duration) -> Self {
        let now = Instant::now();
        Self {
            limit,
            started: now,
            last_check: now,
            interval: INITIAL_CHECK_INTERVAL,
            calls: 0,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn interval(&self) -> usize {
        self.interval
    }

    /// Restart timing from now.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.last_check = now;
        self.interval = INITIAL_CHECK_INTERVAL;
        self.calls = 0;
    }

    /// Count one call. Returns `true` once the limit has passed; the clock is
    /// reset when that happens.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> bool {
        self.calls += 1;
        if self.calls < self.interval {
            return false;
        }
        self.calls = 0;

        let since_last = now.saturating_duration_since(self.last_check);
        self.last_check = now;
        if since_last > Duration::from_secs(1) {
            self.interval = (self.interval / 2).max(MIN_CHECK_INTERVAL);
        } else if since_last.as_secs() == 0 {
            self.interval += self.interval / 2;
        }

        if now.saturating_duration_since(self.started) >= self.limit {
            self.reset();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_calls_widen_the_interval() {
        let mut clock = TimeoutClock::new(Duration::from_secs(60));
        let t0 = clock.started;
        for _ in 0..INITIAL_CHECK_INTERVAL {
            assert!(!clock.tick_at(t0));
        }
        assert_eq!(clock.interval(), 15);
    }

    #[test]
    fn slow_calls_narrow_the_interval_to_a_floor() {
        let mut clock = TimeoutClock::new(Duration::from_secs(3600));
        let mut t = clock.started;
        for _ in 0..40 {
            t += Duration::from_secs(2);
            clock.tick_at(t);
        }
        assert_eq!(clock.interval(), MIN_CHECK_INTERVAL);
    }

    #[test]
    fn expiry_is_seen_at_a_check_and_resets() {
        let mut clock = TimeoutClock::new(Duration::from_secs(1));
        let t0 = clock.started;
        let late = t0 + Duration::from_secs(5);
        for _ in 0..INITIAL_CHECK_INTERVAL - 1 {
            assert!(!clock.tick_at(late));
        }
        assert!(clock.tick_at(late));
        assert_eq!(clock.interval(), INITIAL_CHECK_INTERVAL);
        assert!(clock.started >= t0);
    }
}
