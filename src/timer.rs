//! Millisecond up-counting timer with a saturation threshold.
//!
//! Callers feed in the current monotonic time on every update rather than
//! the timer reading a clock itself, which keeps the alert debounce logic
//! deterministic under test.

use serde::{Deserialize, Serialize};

/// Accumulates elapsed milliseconds up to a threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timer {
    count_ms: u32,
    last_update_ms: u32,
    threshold_ms: u32,
}

impl Timer {
    /// A cleared timer that starts counting from `now_ms`.
    pub fn new(threshold_ms: u32, now_ms: u32) -> Self {
        Timer {
            count_ms: 0,
            last_update_ms: now_ms,
            threshold_ms,
        }
    }

    /// Accumulate the time elapsed since the previous update, saturating at
    /// the threshold. Tolerates timestamp rollover.
    pub fn update(&mut self, now_ms: u32) {
        let elapsed = now_ms.wrapping_sub(self.last_update_ms);
        self.last_update_ms = now_ms;
        self.count_ms = self.count_ms.saturating_add(elapsed).min(self.threshold_ms);
    }

    /// Reset the accumulated count and restart from `now_ms`.
    pub fn clear(&mut self, now_ms: u32) {
        self.count_ms = 0;
        self.last_update_ms = now_ms;
    }

    /// Swap in a new threshold and restart cleared from `now_ms`.
    pub fn configure(&mut self, threshold_ms: u32, now_ms: u32) {
        self.threshold_ms = threshold_ms;
        self.clear(now_ms);
    }

    pub fn expired(&self) -> bool {
        self.count_ms >= self.threshold_ms
    }

    pub fn threshold_ms(&self) -> u32 {
        self.threshold_ms
    }

    pub fn remaining_ms(&self) -> u32 {
        self.threshold_ms - self.count_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_to_threshold() {
        let mut t = Timer::new(100, 0);
        assert!(!t.expired());
        t.update(60);
        assert!(!t.expired());
        assert_eq!(t.remaining_ms(), 40);
        t.update(100);
        assert!(t.expired());
    }

    #[test]
    fn saturates_at_threshold() {
        let mut t = Timer::new(100, 0);
        t.update(5000);
        assert!(t.expired());
        assert_eq!(t.remaining_ms(), 0);
    }

    #[test]
    fn clear_restarts_counting() {
        let mut t = Timer::new(100, 0);
        t.update(80);
        t.clear(80);
        t.update(150);
        assert!(!t.expired());
        assert_eq!(t.remaining_ms(), 30);
    }

    #[test]
    fn zero_threshold_is_always_expired() {
        let t = Timer::new(0, 0);
        assert!(t.expired());
    }

    #[test]
    fn survives_timestamp_rollover() {
        let mut t = Timer::new(100, u32::MAX - 10);
        t.update(40);
        assert_eq!(t.remaining_ms(), 49);
    }
}
