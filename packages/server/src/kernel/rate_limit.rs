//! Rolling-window observer for upstream rate limiting.
//!
//! The upstream game API throttles aggressively. Every request outcome is
//! recorded into a bounded window; the crawler consults the window to decide
//! whether to enter a slowdown period. The observer is a value owned by the
//! HTTP client and shared through an `Arc` handle, never a global.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Snapshot of the observer state.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStats {
    /// Fraction of recent requests that were rate limited (0.0..=1.0)
    pub ratio: f64,
    /// Rate-limited outcomes in the window
    pub rate_limited: usize,
    /// Total outcomes in the window
    pub total: usize,
    /// Ratio above which callers should slow down
    pub threshold: f64,
}

/// Rolling window of request outcomes, counting 429-equivalent responses.
pub struct RateLimitObserver {
    window: Mutex<VecDeque<bool>>,
    capacity: usize,
    threshold: f64,
}

impl RateLimitObserver {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            threshold,
        }
    }

    /// Record one request outcome.
    pub fn record(&self, rate_limited: bool) {
        let mut window = self.window.lock().expect("rate limit window poisoned");
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(rate_limited);
    }

    /// True when the rate-limited ratio over the window exceeds the threshold.
    pub fn should_slow_down(&self) -> bool {
        self.stats().ratio > self.threshold
    }

    pub fn stats(&self) -> RateLimitStats {
        let window = self.window.lock().expect("rate limit window poisoned");
        let total = window.len();
        let rate_limited = window.iter().filter(|limited| **limited).count();
        let ratio = if total == 0 {
            0.0
        } else {
            rate_limited as f64 / total as f64
        };

        RateLimitStats {
            ratio,
            rate_limited,
            total,
            threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_does_not_slow_down() {
        let observer = RateLimitObserver::new(100, 0.1);
        assert!(!observer.should_slow_down());
        assert_eq!(observer.stats().total, 0);
    }

    #[test]
    fn ratio_tracks_rate_limited_outcomes() {
        let observer = RateLimitObserver::new(100, 0.1);
        for _ in 0..9 {
            observer.record(false);
        }
        observer.record(true);

        let stats = observer.stats();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.rate_limited, 1);
        assert!((stats.ratio - 0.1).abs() < f64::EPSILON);
        // Exactly at the threshold is not yet over it
        assert!(!observer.should_slow_down());

        observer.record(true);
        assert!(observer.should_slow_down());
    }

    #[test]
    fn window_is_bounded() {
        let observer = RateLimitObserver::new(4, 0.5);
        observer.record(true);
        observer.record(true);
        for _ in 0..4 {
            observer.record(false);
        }

        let stats = observer.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.rate_limited, 0);
        assert!(!observer.should_slow_down());
    }
}
