//! One-shot eventual values
//!
//! An [`Eventual<T>`] is a single-assignment cell observable from any
//! number of clones; a [`Promise<T>`] is its write side. The cell moves
//! exactly once from pending to one of {ready, failed, discarded}.
//! Consumers chain callbacks (`on_ready`, `on_failed`, `on_any`, ...),
//! bind continuations with `then`, or `.await` the cell directly.
//!
//! Discarding is cooperative: `Eventual::discard()` only records the
//! request and runs `on_discard` observers; a producer that honors it
//! completes the cell as discarded via `Promise::discard()`. Once the
//! cell is completed, discard requests are no-ops. `then` forwards
//! discard requests upward through a weak reference so chains cannot
//! keep each other alive.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::actor::clock::Clock;

/// Why an eventual did not produce a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventualError {
    Failed(String),
    Discarded,
}

impl std::fmt::Display for EventualError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventualError::Failed(message) => write!(f, "{}", message),
            EventualError::Discarded => write!(f, "discarded"),
        }
    }
}

impl std::error::Error for EventualError {}

#[derive(Clone, Debug)]
enum Outcome<T> {
    Ready(T),
    Failed(String),
    Discarded,
}

struct Inner<T> {
    outcome: Option<Outcome<T>>,
    callbacks: Vec<Box<dyn FnOnce(&Outcome<T>) + Send>>,
    discard_observers: Vec<Box<dyn FnOnce() + Send>>,
    discard_requested: bool,
    /// Forwards a consumer discard request to the upstream cell of a
    /// `then` chain. Holds only a weak reference to the upstream.
    upstream: Option<Box<dyn Fn() + Send>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            inner: Mutex::new(Inner {
                outcome: None,
                callbacks: Vec::new(),
                discard_observers: Vec::new(),
                discard_requested: false,
                upstream: None,
                wakers: Vec::new(),
            }),
        })
    }

    /// Transition to `outcome` and run pending callbacks. A second
    /// completion is ignored; the cell is single-assignment.
    fn complete(self: &Arc<Self>, outcome: Outcome<T>) {
        let (callbacks, wakers) = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome);
            inner.discard_observers.clear();
            inner.upstream = None;
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };

        // Callbacks run outside the lock so they may inspect the cell.
        let inner = self.inner.lock();
        let outcome = inner.outcome.clone().unwrap();
        drop(inner);
        for callback in callbacks {
            callback(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Register a completion callback, running it immediately when the
    /// cell has already completed.
    fn observe(self: &Arc<Self>, callback: Box<dyn FnOnce(&Outcome<T>) + Send>) {
        let ready = {
            let mut inner = self.inner.lock();
            match &inner.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    inner.callbacks.push(callback);
                    return;
                }
            }
        };
        if let Some(outcome) = ready {
            callback(&outcome);
        }
    }

    fn request_discard(self: &Arc<Self>) {
        let (observers, upstream) = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() || inner.discard_requested {
                return;
            }
            inner.discard_requested = true;
            (
                std::mem::take(&mut inner.discard_observers),
                inner.upstream.take(),
            )
        };
        for observer in observers {
            observer();
        }
        if let Some(upstream) = upstream {
            upstream();
        }
    }
}

/// The write side of an eventual. Dropping an incomplete promise
/// completes its eventual as discarded, so consumers never hang on a
/// producer that went away.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            shared: Shared::new(),
        }
    }

    /// The read side. May be called any number of times.
    pub fn eventual(&self) -> Eventual<T> {
        Eventual {
            shared: self.shared.clone(),
        }
    }

    pub fn set(&self, value: T) {
        self.shared.complete(Outcome::Ready(value));
    }

    pub fn fail<S: Into<String>>(&self, message: S) {
        self.shared.complete(Outcome::Failed(message.into()));
    }

    /// Honor a discard request (or discard unilaterally).
    pub fn discard(&self) {
        self.shared.complete(Outcome::Discarded);
    }

    /// Observe consumer-initiated discard requests. Runs immediately
    /// if a request already arrived.
    pub fn on_discard<F: FnOnce() + Send + 'static>(&self, observer: F) {
        let mut pending = Some(observer);
        {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            if !inner.discard_requested {
                let observer = pending.take().unwrap();
                inner.discard_observers.push(Box::new(observer));
            }
        }
        // A request already arrived: run outside the lock.
        if let Some(observer) = pending {
            observer();
        }
    }

    /// Whether a consumer has asked for this work to be abandoned.
    pub fn discard_requested(&self) -> bool {
        self.shared.inner.lock().discard_requested
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        let (callbacks, wakers) = {
            let mut inner = self.shared.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(Outcome::Discarded);
            inner.discard_observers.clear();
            inner.upstream = None;
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };
        for callback in callbacks {
            callback(&Outcome::Discarded);
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// The read side of a one-shot cell. Cheap to clone; all clones
/// observe the same completion.
pub struct Eventual<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Eventual<T> {
    fn clone(&self) -> Self {
        Eventual {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Eventual<T> {
    /// An already-ready eventual.
    pub fn ready(value: T) -> Self {
        let promise = Promise::new();
        promise.set(value);
        promise.eventual()
    }

    /// An already-failed eventual.
    pub fn failed<S: Into<String>>(message: S) -> Self {
        let promise = Promise::new();
        promise.fail(message);
        promise.eventual()
    }

    pub fn is_pending(&self) -> bool {
        self.shared.inner.lock().outcome.is_none()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.shared.inner.lock().outcome, Some(Outcome::Ready(_)))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.shared.inner.lock().outcome, Some(Outcome::Failed(_)))
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self.shared.inner.lock().outcome, Some(Outcome::Discarded))
    }

    /// The completed value, if the cell is ready.
    pub fn get(&self) -> Option<T> {
        match &self.shared.inner.lock().outcome {
            Some(Outcome::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The failure message, if the cell failed.
    pub fn failure(&self) -> Option<String> {
        match &self.shared.inner.lock().outcome {
            Some(Outcome::Failed(message)) => Some(message.clone()),
            _ => None,
        }
    }

    pub fn on_ready<F: FnOnce(T) + Send + 'static>(&self, callback: F) -> &Self {
        self.shared.observe(Box::new(move |outcome| {
            if let Outcome::Ready(value) = outcome {
                callback(value.clone());
            }
        }));
        self
    }

    pub fn on_failed<F: FnOnce(String) + Send + 'static>(&self, callback: F) -> &Self {
        self.shared.observe(Box::new(move |outcome| {
            if let Outcome::Failed(message) = outcome {
                callback(message.clone());
            }
        }));
        self
    }

    pub fn on_discarded<F: FnOnce() + Send + 'static>(&self, callback: F) -> &Self {
        self.shared.observe(Box::new(move |outcome| {
            if let Outcome::Discarded = outcome {
                callback();
            }
        }));
        self
    }

    /// Runs on any completion; the callback receives the (now
    /// completed) eventual for inspection.
    pub fn on_any<F: FnOnce(Eventual<T>) + Send + 'static>(&self, callback: F) -> &Self {
        let cell = self.clone();
        self.shared.observe(Box::new(move |_| callback(cell)));
        self
    }

    /// Ask the producer to abandon the work. Runs the producer's
    /// `on_discard` observers; a no-op once the cell has completed.
    pub fn discard(&self) {
        self.shared.request_discard();
    }

    /// Monadic bind: apply `f` to the value when ready. Failure and
    /// discard propagate unchanged. A discard request on the returned
    /// cell is forwarded upstream.
    pub fn then<U, F>(&self, f: F) -> Eventual<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let target = Shared::<U>::new();
        self.link_upstream(&target);

        let completer = target.clone();
        self.shared.observe(Box::new(move |outcome| {
            let mapped = match outcome {
                Outcome::Ready(value) => Outcome::Ready(f(value.clone())),
                Outcome::Failed(message) => Outcome::Failed(message.clone()),
                Outcome::Discarded => Outcome::Discarded,
            };
            completer.complete(mapped);
        }));

        Eventual { shared: target }
    }

    /// Like `then`, for continuations that are themselves eventual.
    pub fn then_eventual<U, F>(&self, f: F) -> Eventual<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Eventual<U> + Send + 'static,
    {
        let target = Shared::<U>::new();
        self.link_upstream(&target);

        let completer = target.clone();
        self.shared.observe(Box::new(move |outcome| match outcome {
            Outcome::Ready(value) => {
                let next = f(value.clone());
                let completer = completer.clone();
                next.shared.observe(Box::new(move |inner_outcome| {
                    completer.complete(inner_outcome.clone());
                }));
            }
            Outcome::Failed(message) => completer.complete(Outcome::Failed(message.clone())),
            Outcome::Discarded => completer.complete(Outcome::Discarded),
        }));

        Eventual { shared: target }
    }

    /// Recover from failure or discard with a fallback value.
    pub fn recover<F>(&self, f: F) -> Eventual<T>
    where
        F: FnOnce(EventualError) -> T + Send + 'static,
    {
        let target = Shared::<T>::new();
        self.link_upstream(&target);

        let completer = target.clone();
        self.shared.observe(Box::new(move |outcome| {
            let mapped = match outcome {
                Outcome::Ready(value) => Outcome::Ready(value.clone()),
                Outcome::Failed(message) => {
                    Outcome::Ready(f(EventualError::Failed(message.clone())))
                }
                Outcome::Discarded => Outcome::Ready(f(EventualError::Discarded)),
            };
            completer.complete(mapped);
        }));

        Eventual { shared: target }
    }

    /// Timer-backed fallback: when the cell is still pending after
    /// `duration`, complete with the fallback's result instead. The
    /// fallback receives the still-pending original (typically to
    /// discard it).
    pub fn after<F>(&self, clock: &Clock, duration: Duration, fallback: F) -> Eventual<T>
    where
        F: FnOnce(Eventual<T>) -> Eventual<T> + Send + 'static,
    {
        let target = Shared::<T>::new();

        let original = self.clone();
        let fallback_target = target.clone();
        let timer = clock.delay(duration, move || {
            if fallback_target.inner.lock().outcome.is_some() {
                return;
            }
            let result = fallback(original.clone());
            result.shared.observe(Box::new(move |outcome| {
                fallback_target.complete(outcome.clone());
            }));
        });

        let completer = target.clone();
        self.shared.observe(Box::new(move |outcome| {
            timer.cancel();
            completer.complete(outcome.clone());
        }));

        Eventual { shared: target }
    }

    /// Install a weak upstream hook on `target` so that a discard
    /// request on it propagates back to this cell.
    fn link_upstream<U: Clone + Send + 'static>(&self, target: &Arc<Shared<U>>) {
        let upstream: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        target.inner.lock().upstream = Some(Box::new(move || {
            if let Some(shared) = upstream.upgrade() {
                shared.request_discard();
            }
        }));
    }
}

/// Wait for every eventual, collecting per-item outcomes. The result
/// is ready once all inputs completed, in input order; failures and
/// discards surface as `Err` entries rather than failing the whole
/// collection.
pub fn collect<T: Clone + Send + 'static>(
    items: Vec<Eventual<T>>,
) -> Eventual<Vec<Result<T, EventualError>>> {
    if items.is_empty() {
        return Eventual::ready(Vec::new());
    }

    struct Collector<T> {
        slots: Vec<Option<Result<T, EventualError>>>,
        remaining: usize,
    }

    let promise = Promise::new();
    let result = promise.eventual();
    let total = items.len();
    let collector = Arc::new(Mutex::new(Collector {
        slots: (0..total).map(|_| None).collect(),
        remaining: total,
    }));
    let promise = Arc::new(promise);

    for (index, item) in items.into_iter().enumerate() {
        let collector = collector.clone();
        let promise = promise.clone();
        item.on_any(move |completed| {
            let outcome = if let Some(value) = completed.get() {
                Ok(value)
            } else if let Some(message) = completed.failure() {
                Err(EventualError::Failed(message))
            } else {
                Err(EventualError::Discarded)
            };

            let finished = {
                let mut state = collector.lock();
                state.slots[index] = Some(outcome);
                state.remaining -= 1;
                state.remaining == 0
            };
            if finished {
                let slots = std::mem::take(&mut collector.lock().slots);
                promise.set(slots.into_iter().map(|slot| slot.unwrap()).collect());
            }
        });
    }

    result
}

impl<T: Clone + Send + 'static> Future for Eventual<T> {
    type Output = Result<T, EventualError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        match &inner.outcome {
            Some(Outcome::Ready(value)) => Poll::Ready(Ok(value.clone())),
            Some(Outcome::Failed(message)) => {
                Poll::Ready(Err(EventualError::Failed(message.clone())))
            }
            Some(Outcome::Discarded) => Poll::Ready(Err(EventualError::Discarded)),
            None => {
                inner.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    // === Completion ===

    #[test]
    fn test_set_runs_ready_callbacks() {
        let promise = Promise::new();
        let observed = Arc::new(AtomicU32::new(0));

        let seen = observed.clone();
        promise.eventual().on_ready(move |v: u32| {
            seen.store(v, Ordering::SeqCst);
        });

        promise.set(42);
        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_callback_after_completion_runs_immediately() {
        let eventual = Eventual::ready(7u32);
        let observed = Arc::new(AtomicU32::new(0));
        let seen = observed.clone();
        eventual.on_ready(move |v| {
            seen.store(v, Ordering::SeqCst);
        });
        assert_eq!(observed.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_single_assignment() {
        let promise = Promise::new();
        promise.set(1u32);
        promise.fail("too late");
        assert_eq!(promise.eventual().get(), Some(1));
    }

    #[test]
    fn test_dropping_promise_discards() {
        let eventual = {
            let promise = Promise::<u32>::new();
            promise.eventual()
        };
        assert!(eventual.is_discarded());
    }

    // === then / recover ===

    #[test]
    fn test_then_maps_value() {
        let promise = Promise::new();
        let doubled = promise.eventual().then(|v: u32| v * 2);
        promise.set(21);
        assert_eq!(doubled.get(), Some(42));
    }

    #[test]
    fn test_then_propagates_failure_unchanged() {
        let promise = Promise::<u32>::new();
        let chained = promise.eventual().then(|v| v + 1).then(|v| v + 1);
        promise.fail("boom");
        assert_eq!(chained.failure().as_deref(), Some("boom"));
    }

    #[test]
    fn test_then_eventual_flattens() {
        let promise = Promise::new();
        let chained = promise
            .eventual()
            .then_eventual(|v: u32| Eventual::ready(v + 1));
        promise.set(1);
        assert_eq!(chained.get(), Some(2));
    }

    #[test]
    fn test_recover_handles_failure() {
        let recovered = Eventual::<u32>::failed("nope").recover(|_| 5);
        assert_eq!(recovered.get(), Some(5));
    }

    // === Discard ===

    #[test]
    fn test_discard_request_runs_producer_observer() {
        let promise = Promise::<u32>::new();
        let asked = Arc::new(AtomicBool::new(false));

        let flag = asked.clone();
        promise.on_discard(move || {
            flag.store(true, Ordering::SeqCst);
        });

        promise.eventual().discard();
        assert!(asked.load(Ordering::SeqCst));
        assert!(promise.discard_requested());
        // The producer has not honored the request yet.
        assert!(promise.eventual().is_pending());

        promise.discard();
        assert!(promise.eventual().is_discarded());
    }

    #[test]
    fn test_discard_after_completion_is_noop() {
        let promise = Promise::new();
        promise.set(3u32);
        let eventual = promise.eventual();
        eventual.discard();
        assert_eq!(eventual.get(), Some(3));
    }

    #[test]
    fn test_then_forwards_discard_upstream() {
        let promise = Promise::<u32>::new();
        let asked = Arc::new(AtomicBool::new(false));

        let flag = asked.clone();
        promise.on_discard(move || {
            flag.store(true, Ordering::SeqCst);
        });

        let chained = promise.eventual().then(|v| v + 1);
        chained.discard();

        assert!(asked.load(Ordering::SeqCst));
    }

    // === after ===

    #[test]
    fn test_after_fires_fallback_on_timeout() {
        let clock = Clock::paused();
        let promise = Promise::<u32>::new();
        let asked = Arc::new(AtomicBool::new(false));

        let flag = asked.clone();
        promise.on_discard(move || {
            flag.store(true, Ordering::SeqCst);
        });

        let bounded = promise.eventual().after(&clock, Duration::from_secs(5), |original| {
            original.discard();
            Eventual::failed("timed out")
        });

        clock.advance(Duration::from_secs(4));
        assert!(bounded.is_pending());

        clock.advance(Duration::from_secs(1));
        assert_eq!(bounded.failure().as_deref(), Some("timed out"));
        // The fallback asked the producer to abandon the work.
        assert!(asked.load(Ordering::SeqCst));
    }

    #[test]
    fn test_after_is_cancelled_by_completion() {
        let clock = Clock::paused();
        let promise = Promise::new();
        let bounded = promise
            .eventual()
            .after(&clock, Duration::from_secs(5), |_| Eventual::failed("timed out"));

        promise.set(11u32);
        assert_eq!(bounded.get(), Some(11));

        // The expired timer changes nothing.
        clock.advance(Duration::from_secs(10));
        assert_eq!(bounded.get(), Some(11));
    }

    // === collect ===

    #[test]
    fn test_collect_preserves_order_and_outcomes() {
        let first = Promise::new();
        let second = Promise::new();
        let all = collect(vec![
            first.eventual(),
            second.eventual(),
            Eventual::failed("bad"),
        ]);

        assert!(all.is_pending());
        second.set(2u32);
        assert!(all.is_pending());
        first.set(1u32);

        assert_eq!(
            all.get(),
            Some(vec![
                Ok(1),
                Ok(2),
                Err(EventualError::Failed("bad".to_string()))
            ])
        );
    }

    #[test]
    fn test_collect_of_nothing_is_ready() {
        let all = collect::<u32>(Vec::new());
        assert_eq!(all.get(), Some(Vec::new()));
    }

    // === await ===

    #[tokio::test]
    async fn test_await_ready() {
        let promise = Promise::new();
        let eventual = promise.eventual();

        tokio::spawn(async move {
            promise.set(9u32);
        });

        assert_eq!(eventual.await, Ok(9));
    }

    #[tokio::test]
    async fn test_await_failed() {
        let eventual = Eventual::<u32>::failed("broken");
        assert_eq!(
            eventual.await,
            Err(EventualError::Failed("broken".to_string()))
        );
    }
}
