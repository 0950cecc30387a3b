use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Consecutive-failure guard for the host's outbound writes.
///
/// After `threshold` failures in a row the breaker opens for `cooldown`;
/// while open, enqueueing is a no-op. Once the cooldown has elapsed the
/// breaker lets traffic through again (half-open): a success closes it and
/// zeroes the counter, another failure re-opens it straight away.
///
/// All state is atomic so the real-time tick thread can query it without
/// taking a lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: AtomicU32,
    /// Millis since `epoch` + 1 at which the breaker opened; 0 = closed.
    opened_at: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// True while the cooldown window is running.
    pub fn is_open(&self) -> bool {
        let opened = self.opened_at.load(Ordering::Acquire);
        if opened == 0 {
            return false;
        }
        let elapsed_since_open = self.now_millis().saturating_sub(opened);
        u128::from(elapsed_since_open) < self.cooldown.as_millis()
    }

    /// Time left before the breaker lets traffic through again.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let opened = self.opened_at.load(Ordering::Acquire);
        if opened == 0 {
            return None;
        }
        let elapsed = Duration::from_millis(self.now_millis().saturating_sub(opened));
        self.cooldown.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// A write succeeded: close the breaker and zero the counter.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.opened_at.store(0, Ordering::Release);
    }

    /// A write failed. Returns `true` if this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let failures = self
            .failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        if failures < self.threshold || self.is_open() {
            return false;
        }
        self.opened_at.store(self.now_millis(), Ordering::Release);
        true
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn now_millis(&self) -> u64 {
        // +1 keeps a breaker opened in the first millisecond distinct from "closed".
        (self.epoch.elapsed().as_millis() as u64).saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(!breaker.is_open());

        assert!(breaker.record_failure());
        assert!(breaker.is_open());
        assert_eq!(breaker.consecutive_failures(), 3);
        assert!(breaker.remaining_cooldown().is_some());
    }

    #[test]
    fn failures_while_open_do_not_reopen() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        assert!(breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_counter() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure());
    }

    #[test]
    fn half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(30));
        breaker.record_failure();
        assert!(breaker.record_failure());
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!breaker.is_open());
        assert!(breaker.remaining_cooldown().is_none());

        // Still above threshold: the next failure re-opens immediately.
        assert!(breaker.record_failure());
        assert!(breaker.is_open());
    }

    #[test]
    fn success_after_cooldown_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        assert!(breaker.record_failure());
        std::thread::sleep(Duration::from_millis(40));

        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.is_open());
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(0, Duration::from_secs(1));
        assert_eq!(breaker.threshold(), 1);
    }
}
