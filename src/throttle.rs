//! Request throttling for the upstream data provider
//!
//! - `TokenBucket`: per-second request ceiling (Kite allows ~3 req/s)
//! - `RequestPacer`: fixed minimum spacing between consecutive requests
//! - `AdaptiveDelay`: additive-increase/additive-decrease inter-batch delay

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Historical-fetch budget refilled continuously at the provider's rate.
///
/// Holds at most one second's worth of fetches, so a burst after an idle
/// spell never exceeds the per-second ceiling.
#[derive(Debug)]
pub struct TokenBucket {
    per_sec: f64,
    available: f64,
    updated: Instant,
}

impl TokenBucket {
    pub fn new(fetches_per_sec: u32) -> Self {
        let per_sec = fetches_per_sec.max(1) as f64;
        Self {
            per_sec,
            available: per_sec,
            updated: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let earned = now.saturating_duration_since(self.updated).as_secs_f64() * self.per_sec;
        self.available = (self.available + earned).min(self.per_sec);
        self.updated = now;
    }

    /// Spend one fetch as of `now`. On an empty budget, returns how long
    /// until the next fetch is earned.
    pub fn take_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.available >= 1.0 {
            self.available -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.available) / self.per_sec))
        }
    }
}

/// Fetch budget shared by every caller of one provider client
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(fetches_per_sec: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(fetches_per_sec)),
        }
    }

    /// Wait until the budget allows one more fetch, then spend it
    pub async fn acquire(&self) {
        loop {
            let wait = match self.bucket.lock().take_at(Instant::now()) {
                Ok(()) => return,
                Err(wait) => wait,
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

/// Minimum spacing between consecutive requests
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Returns Ok(()) if allowed to proceed, Err(wait_time) if need to wait
    pub fn check(&self) -> Result<(), Duration> {
        let mut last = self.last_request.lock();

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.interval {
                return Err(self.interval - elapsed);
            }
        }

        *last = Some(Instant::now());
        Ok(())
    }

    /// Wait out the remaining interval, then claim the slot
    pub async fn wait(&self) {
        while let Err(wait) = self.check() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Inter-batch delay controller.
///
/// Starts at the floor, grows by `step` times the current error streak up
/// to the ceiling, shrinks by `recovery` per success back to the floor.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    floor: f64,
    ceiling: f64,
    step: f64,
    recovery: f64,
    current: f64,
    error_streak: u32,
}

impl AdaptiveDelay {
    pub fn new(floor: f64, ceiling: f64, step: f64, recovery: f64) -> Self {
        Self {
            floor,
            ceiling,
            step,
            recovery,
            current: floor,
            error_streak: 0,
        }
    }

    pub fn on_success(&mut self) {
        self.error_streak = 0;
        self.current = (self.current - self.recovery).max(self.floor);
    }

    pub fn on_error(&mut self) {
        self.error_streak += 1;
        self.current = (self.current + self.step * self.error_streak as f64).min(self.ceiling);
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs_f64(self.current.max(0.0))
    }

    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_budget_exhausts_after_one_second_of_requests() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3);

        for _ in 0..3 {
            assert!(bucket.take_at(start).is_ok());
        }
        let wait = bucket.take_at(start).unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_millis(334));
    }

    #[test]
    fn test_fetch_budget_earns_back_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3);
        for _ in 0..3 {
            bucket.take_at(start).unwrap();
        }

        let later = start + Duration::from_millis(700);
        assert!(bucket.take_at(later).is_ok());
        assert!(bucket.take_at(later).is_ok());
        assert!(bucket.take_at(later).is_err());

        // Idle time never banks more than one second of fetches
        let idle = later + Duration::from_secs(60);
        for _ in 0..3 {
            assert!(bucket.take_at(idle).is_ok());
        }
        assert!(bucket.take_at(idle).is_err());
    }

    #[test]
    fn test_backfill_pacer_spaces_single_candle_fetches() {
        let pacer = RequestPacer::from_secs_f64(1.5);

        assert!(pacer.check().is_ok());
        let wait = pacer.check().unwrap_err();
        assert!(wait > Duration::from_secs(1) && wait <= Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_pacer_never_waits() {
        let pacer = RequestPacer::new(Duration::ZERO);
        assert!(pacer.check().is_ok());
        assert!(pacer.check().is_ok());
    }

    #[test]
    fn test_adaptive_delay_backoff_and_recovery() {
        let mut delay = AdaptiveDelay::new(0.5, 10.0, 1.0, 0.5);
        assert_eq!(delay.current(), Duration::from_millis(500));

        delay.on_error();
        assert_eq!(delay.current(), Duration::from_millis(1500));
        delay.on_error();
        assert_eq!(delay.current(), Duration::from_millis(3500));
        assert_eq!(delay.error_streak(), 2);

        for _ in 0..20 {
            delay.on_error();
        }
        assert_eq!(delay.current(), Duration::from_secs(10));

        delay.on_success();
        assert_eq!(delay.current(), Duration::from_millis(9500));
        assert_eq!(delay.error_streak(), 0);

        for _ in 0..40 {
            delay.on_success();
        }
        assert_eq!(delay.current(), Duration::from_millis(500));
    }
}
