//! Process-wide clock and timers
//!
//! Every timer in the crate is created through a [`Clock`] so that
//! tests can pause time and advance it deterministically. While
//! running, a background driver task fires timers off the tokio
//! runtime; while paused, time only moves through [`Clock::advance`],
//! which fires due timers inline on the calling thread.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

type TimerAction = Box<dyn FnOnce() + Send>;

struct ClockState {
    paused: bool,
    /// Virtual time accumulated before the current running span.
    offset: Duration,
    /// Real instant the current running span began; None while paused.
    resumed_at: Option<Instant>,
    /// Armed timers ordered by (deadline, sequence).
    timers: BTreeMap<(Duration, u64), TimerAction>,
    next_id: u64,
}

struct ClockInner {
    state: Mutex<ClockState>,
    notify: Notify,
}

/// Monotonic while running; pauseable and advanceable for tests.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    /// A running clock. When called inside a tokio runtime a driver
    /// task is spawned to fire timers in real time.
    pub fn new() -> Self {
        let clock = Clock {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    paused: false,
                    offset: Duration::ZERO,
                    resumed_at: Some(Instant::now()),
                    timers: BTreeMap::new(),
                    next_id: 0,
                }),
                notify: Notify::new(),
            }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = Arc::downgrade(&clock.inner);
            handle.spawn(async move {
                Clock::drive(driver).await;
            });
        }

        clock
    }

    /// A clock that starts paused; time moves only via `advance`.
    pub fn paused() -> Self {
        let clock = Clock::new();
        clock.pause();
        clock
    }

    /// Virtual elapsed time since the clock was created.
    pub fn now(&self) -> Duration {
        let state = self.inner.state.lock();
        state.offset
            + state
                .resumed_at
                .map(|instant| instant.elapsed())
                .unwrap_or(Duration::ZERO)
    }

    /// Seconds since clock start, for status timestamps.
    pub fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if let Some(resumed_at) = state.resumed_at.take() {
            state.offset += resumed_at.elapsed();
            state.paused = true;
        }
        self.inner.notify.notify_waiters();
    }

    pub fn resume(&self) {
        let mut state = self.inner.state.lock();
        if state.paused {
            state.paused = false;
            state.resumed_at = Some(Instant::now());
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Move a paused clock forward, firing every timer that comes due.
    /// Timers fire in deadline order, on the calling thread.
    pub fn advance(&self, duration: Duration) {
        {
            let mut state = self.inner.state.lock();
            assert!(state.paused, "advance requires a paused clock");
            state.offset += duration;
        }
        Self::fire_due(&self.inner);
    }

    /// Arm a timer that runs `action` after `duration`.
    pub fn delay<F: FnOnce() + Send + 'static>(&self, duration: Duration, action: F) -> Timer {
        let key = {
            let mut state = self.inner.state.lock();
            let deadline = state.offset
                + state
                    .resumed_at
                    .map(|instant| instant.elapsed())
                    .unwrap_or(Duration::ZERO)
                + duration;
            let id = state.next_id;
            state.next_id += 1;
            state.timers.insert((deadline, id), Box::new(action));
            (deadline, id)
        };
        self.inner.notify.notify_waiters();
        Timer {
            key,
            clock: Arc::downgrade(&self.inner),
        }
    }

    fn fire_due(inner: &Arc<ClockInner>) {
        loop {
            let action = {
                let mut state = inner.state.lock();
                let now = state.offset
                    + state
                        .resumed_at
                        .map(|instant| instant.elapsed())
                        .unwrap_or(Duration::ZERO);
                match state.timers.keys().next().copied() {
                    Some(key) if key.0 <= now => state.timers.remove(&key),
                    _ => None,
                }
            };
            match action {
                // Run outside the lock: actions may arm new timers.
                Some(action) => action(),
                None => break,
            }
        }
    }

    async fn drive(inner: Weak<ClockInner>) {
        loop {
            let Some(clock) = inner.upgrade() else {
                return;
            };

            let wait = {
                let state = clock.state.lock();
                if state.paused {
                    None
                } else {
                    state.timers.keys().next().map(|(deadline, _)| {
                        let now = state.offset
                            + state
                                .resumed_at
                                .map(|instant| instant.elapsed())
                                .unwrap_or(Duration::ZERO);
                        deadline.saturating_sub(now)
                    })
                }
            };

            // Idle waits are bounded so the driver notices when the
            // last clock handle is dropped.
            match wait {
                Some(Duration::ZERO) => Self::fire_due(&clock),
                Some(remaining) => {
                    let bounded = remaining.min(Duration::from_secs(1));
                    tokio::select! {
                        _ = tokio::time::sleep(bounded) => {}
                        _ = clock.notify.notified() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = clock.notify.notified() => {}
                    }
                }
            }
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

/// Handle to an armed timer.
pub struct Timer {
    key: (Duration, u64),
    clock: Weak<ClockInner>,
}

impl Timer {
    /// Cancel the timer. Returns false when it already fired (or the
    /// clock is gone).
    pub fn cancel(&self) -> bool {
        match self.clock.upgrade() {
            Some(inner) => inner.state.lock().timers.remove(&self.key).is_some(),
            None => false,
        }
    }
}
