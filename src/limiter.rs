//! Fixed-window counting admission gate.
//!
//! One counter per client key, reset at fixed wall-clock intervals.
//! Exactly `limit` admissions succeed per window; the `limit + 1`-th call
//! in the same window is the first rejection, and rejected calls still
//! count toward the window — a client hammering a closed gate does not
//! earn itself an earlier reopening.
//!
//! # The boundary burst
//!
//! Fixed windows are an approximation: a burst straddling a window
//! boundary can admit up to `2 × limit` requests across the two adjacent
//! windows. That is the documented, accepted behavior of this gate — do
//! not "fix" it to a sliding window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The outcome of one admission check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Within the window's budget.
    Allowed {
        /// Admissions left in the current window.
        remaining: u32,
    },
    /// Over budget until the window turns over.
    Rejected {
        /// Time until the current window elapses.
        retry_after: Duration,
    },
}

/// Per-key window record: when the window opened and how many calls it has
/// seen, rejected ones included.
#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// A counting admission-control gate keyed by client identity.
///
/// The store is a mutex-guarded map: the read-then-increment on a key's
/// counter happens entirely under the lock, so two concurrent checks for
/// the same key can never both observe the same count. Keys partition
/// naturally — one client's burst never changes another's budget.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    records: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts one call from `key` against the current window and admits or
    /// rejects it.
    ///
    /// A key's first call, or its first call after the window elapsed,
    /// opens a fresh window.
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut records = self.records.lock().expect("rate limiter mutex poisoned");

        let window = records
            .entry(key.to_owned())
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > self.limit {
            Admission::Rejected {
                retry_after: self.window - now.duration_since(window.started),
            }
        } else {
            Admission::Allowed {
                remaining: self.limit - window.count,
            }
        }
    }

    /// Drops every record whose window has already elapsed.
    ///
    /// Stale records are harmless — `admit` resets them on the key's next
    /// call — but keys that never return would otherwise accumulate.
    /// Call this opportunistically from a maintenance task.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut records = self.records.lock().expect("rate limiter mutex poisoned");
        records.retain(|_, window| now.duration_since(window.started) < self.window);
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(900_000);

    #[test]
    fn limit_admissions_then_first_rejection() {
        // L=2, W=900000ms: calls 1 and 2 allowed, call 3 is the first rejection.
        let limiter = RateLimiter::new(2, WINDOW);
        let start = Instant::now();

        assert_eq!(
            limiter.admit_at("10.0.0.1", start),
            Admission::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.admit_at("10.0.0.1", start + Duration::from_millis(1)),
            Admission::Allowed { remaining: 0 }
        );
        assert!(matches!(
            limiter.admit_at("10.0.0.1", start + Duration::from_millis(2)),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn rejected_calls_count_toward_the_window() {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();

        limiter.admit_at("k", start);
        // Every further call in the window is rejected, however many there are.
        for n in 1..5 {
            let at = start + Duration::from_millis(n);
            assert!(matches!(
                limiter.admit_at("k", at),
                Admission::Rejected { .. }
            ));
        }
    }

    #[test]
    fn window_turnover_resets_the_count() {
        let limiter = RateLimiter::new(2, WINDOW);
        let start = Instant::now();

        limiter.admit_at("k", start);
        limiter.admit_at("k", start);
        assert!(matches!(
            limiter.admit_at("k", start + Duration::from_millis(1)),
            Admission::Rejected { .. }
        ));

        // Exactly one window later a fresh budget opens.
        assert_eq!(
            limiter.admit_at("k", start + WINDOW),
            Admission::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();

        limiter.admit_at("a", start);
        assert!(matches!(
            limiter.admit_at("a", start),
            Admission::Rejected { .. }
        ));
        assert_eq!(
            limiter.admit_at("b", start),
            Admission::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn retry_after_is_the_remaining_window() {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();

        limiter.admit_at("k", start);
        let elapsed = Duration::from_millis(300_000);
        match limiter.admit_at("k", start + elapsed) {
            Admission::Rejected { retry_after } => {
                assert_eq!(retry_after, WINDOW - elapsed);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn sweep_drops_only_stale_records() {
        let limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();

        limiter.admit_at("old", start);
        limiter.admit_at("fresh", start + WINDOW - Duration::from_millis(1));
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.sweep_at(start + WINDOW);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
