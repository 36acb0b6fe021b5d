//! Message-admission rate limiting
//!
//! A [`RateLimiter`] grants permits in FIFO order at a fixed rate,
//! driven by clock timers so tests stay deterministic. A
//! [`BoundedRateLimiter`] adds the per-principal capacity bound used
//! by the master's admission layer: `pending` counts messages that
//! were admitted but not yet dispatched, and a message arriving with
//! `pending >= capacity` is dropped with an error.

use crate::actor::clock::Clock;
use crate::eventual::{Eventual, Promise};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

struct LimiterState {
    interval: Duration,
    /// Virtual time at which the next permit becomes free.
    next_free: Duration,
    waiters: VecDeque<Promise<()>>,
    timer_armed: bool,
}

struct LimiterInner {
    clock: Clock,
    state: Mutex<LimiterState>,
}

/// Grants permits at `permits_per_second`, in acquisition order.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(clock: Clock, permits_per_second: f64) -> Self {
        assert!(
            permits_per_second > 0.0,
            "rate limit must be a positive rate"
        );
        RateLimiter {
            inner: Arc::new(LimiterInner {
                clock,
                state: Mutex::new(LimiterState {
                    interval: Duration::from_secs_f64(1.0 / permits_per_second),
                    next_free: Duration::ZERO,
                    waiters: VecDeque::new(),
                    timer_armed: false,
                }),
            }),
        }
    }

    /// Acquire the next permit. Resolves immediately when a permit is
    /// free and nobody is queued ahead.
    pub fn acquire(&self) -> Eventual<()> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();

        if state.waiters.is_empty() && state.next_free <= now {
            state.next_free = now + state.interval;
            return Eventual::ready(());
        }

        let promise = Promise::new();
        let eventual = promise.eventual();
        state.waiters.push_back(promise);
        Self::arm_timer(&self.inner, &mut state, now);
        eventual
    }

    fn arm_timer(inner: &Arc<LimiterInner>, state: &mut LimiterState, now: Duration) {
        if state.timer_armed || state.waiters.is_empty() {
            return;
        }
        state.timer_armed = true;
        let wait = state.next_free.saturating_sub(now);
        let limiter = inner.clone();
        inner.clock.delay(wait, move || {
            RateLimiter::grant_due(&limiter);
        });
    }

    fn grant_due(inner: &Arc<LimiterInner>) {
        let mut granted = Vec::new();
        {
            let now = inner.clock.now();
            let mut state = inner.state.lock();
            state.timer_armed = false;

            while state.next_free <= now {
                match state.waiters.pop_front() {
                    Some(promise) => {
                        let interval = state.interval;
                        state.next_free += interval;
                        granted.push(promise);
                    }
                    None => break,
                }
            }

            Self::arm_timer(inner, &mut state, now);
        }

        // Resolve outside the lock; callbacks may acquire again.
        for promise in granted {
            promise.set(());
        }
    }
}

/// A rate limiter with a bound on admitted-but-undispatched messages.
pub struct BoundedRateLimiter {
    pub limiter: RateLimiter,
    pub capacity: Option<u64>,
    pub pending: u64,
}

impl BoundedRateLimiter {
    pub fn new(clock: Clock, permits_per_second: f64, capacity: Option<u64>) -> Self {
        BoundedRateLimiter {
            limiter: RateLimiter::new(clock, permits_per_second),
            capacity,
            pending: 0,
        }
    }

    /// Whether another message may be admitted.
    pub fn has_capacity(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.pending < capacity,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_first_permit_is_immediate() {
        let clock = Clock::paused();
        let limiter = RateLimiter::new(clock, 1.0);
        assert!(limiter.acquire().is_ready());
    }

    #[test]
    fn test_permits_spaced_by_rate() {
        let clock = Clock::paused();
        let limiter = RateLimiter::new(clock.clone(), 1.0);

        let first = limiter.acquire();
        let second = limiter.acquire();
        let third = limiter.acquire();

        assert!(first.is_ready());
        assert!(second.is_pending());
        assert!(third.is_pending());

        clock.advance(Duration::from_secs(1));
        assert!(second.is_ready());
        assert!(third.is_pending());

        clock.advance(Duration::from_secs(1));
        assert!(third.is_ready());
    }

    #[test]
    fn test_grants_are_fifo() {
        let clock = Clock::paused();
        let limiter = RateLimiter::new(clock.clone(), 2.0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let _ = limiter.acquire();

        for label in 0..3 {
            let order = order.clone();
            limiter.acquire().on_ready(move |_| {
                order.lock().push(label);
            });
        }

        clock.advance(Duration::from_secs(2));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_idle_limiter_does_not_accumulate_burst() {
        let clock = Clock::paused();
        let limiter = RateLimiter::new(clock.clone(), 1.0);

        let _ = limiter.acquire();
        clock.advance(Duration::from_secs(100));

        // After a long idle stretch only one permit is immediately
        // free; the next still waits a full interval.
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = counter.clone();
            limiter.acquire().on_ready(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bounded_capacity() {
        let clock = Clock::paused();
        let mut bounded = BoundedRateLimiter::new(clock, 1.0, Some(2));

        assert!(bounded.has_capacity());
        bounded.pending = 2;
        assert!(!bounded.has_capacity());

        let mut unbounded = BoundedRateLimiter::new(Clock::paused(), 1.0, None);
        unbounded.pending = u64::MAX;
        assert!(unbounded.has_capacity());
    }
}
