//! Deferred values and the wave scheduler.
//!
//! Resolvers run inside one cooperative task. When every resolver that can
//! make progress has either finished or is waiting on a [`Deferred`], the wave
//! is over: [`Scheduler::drive`] flushes the queued batch dispatches, which
//! resolve the deferred values, and then resumes the execution.

use crate::error::LoaderResult;
use crate::source::BoxFuture;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::future::{poll_fn, Future};
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use tracing::debug;

enum Slot<T> {
    Pending(Vec<Waker>),
    Ready(LoaderResult<T>),
}

/// A value that becomes available once, possibly as an error.
///
/// Clones share the same slot. Awaiting a `Deferred` yields a clone of the
/// result; any number of continuations may await it.
pub struct Deferred<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Deferred<T> {
    /// Creates an unresolved value.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Pending(Vec::new()))),
        }
    }

    /// Resolves the value. Returns false if it was already resolved, in which
    /// case `result` is discarded.
    pub fn resolve(&self, result: LoaderResult<T>) -> bool {
        let wakers = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Ready(_) => return false,
                Slot::Pending(wakers) => {
                    let wakers = std::mem::take(wakers);
                    *slot = Slot::Ready(result);
                    wakers
                }
            }
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Returns true once resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Returns true if both handles share one slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns the result if resolved.
    pub fn peek(&self) -> Option<LoaderResult<T>> {
        match &*self.slot.lock() {
            Slot::Ready(result) => Some(result.clone()),
            Slot::Pending(_) => None,
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = LoaderResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Ready(result) => Poll::Ready(result.clone()),
            Slot::Pending(wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Work queued until the end of the current wave.
pub trait Dispatch: Send + Sync {
    /// Performs the work.
    fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// Forwards wake-ups to the task driving an execution, remembering that one
/// happened.
#[derive(Default)]
struct WakeSignal {
    woken: AtomicBool,
    outer: Mutex<Option<Waker>>,
}

impl WakeSignal {
    fn register(&self, waker: &Waker) {
        let mut outer = self.outer.lock();
        match &*outer {
            Some(current) if current.will_wake(waker) => {}
            _ => *outer = Some(waker.clone()),
        }
    }
}

impl Wake for WakeSignal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::SeqCst);
        if let Some(waker) = &*self.outer.lock() {
            waker.wake_by_ref();
        }
    }
}

/// Collects dispatches during a wave and runs them at its end.
#[derive(Default)]
pub struct Scheduler {
    queue: Mutex<Vec<Arc<dyn Dispatch>>>,
    waves: AtomicUsize,
    dispatched: AtomicUsize,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues work for the end of the current wave.
    pub fn defer(&self, work: Arc<dyn Dispatch>) {
        self.queue.lock().push(work);
    }

    /// Returns true if work is queued.
    pub fn has_pending(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Runs everything queued so far. Distinct dispatches run concurrently.
    /// Returns the number of dispatches run.
    pub async fn flush(&self) -> usize {
        let work = std::mem::take(&mut *self.queue.lock());
        if work.is_empty() {
            return 0;
        }

        let count = work.len();
        let wave = self.waves.fetch_add(1, Ordering::SeqCst) + 1;
        self.dispatched.fetch_add(count, Ordering::SeqCst);
        debug!(wave, batches = count, "flushing deferred work");

        join_all(work.into_iter().map(|w| w.dispatch())).await;
        count
    }

    /// Runs `future` to completion, flushing queued work every time it stalls
    /// on deferred values.
    ///
    /// A poll that ends with the future waking itself means some resolvers
    /// were not polled yet (large joins yield part way through), so the wave
    /// only ends on a `Pending` without a self-wake.
    pub async fn drive<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let signal = Arc::new(WakeSignal::default());
        let waker = Waker::from(Arc::clone(&signal));
        loop {
            let step = poll_fn(|cx| {
                signal.register(cx.waker());
                signal.woken.store(false, Ordering::SeqCst);
                let mut inner = Context::from_waker(&waker);
                match future.as_mut().poll(&mut inner) {
                    Poll::Ready(output) => Poll::Ready(Some(output)),
                    // The outer waker was woken too; yield and come back.
                    Poll::Pending if signal.woken.load(Ordering::SeqCst) => Poll::Pending,
                    Poll::Pending if self.has_pending() => Poll::Ready(None),
                    Poll::Pending => Poll::Pending,
                }
            })
            .await;

            match step {
                Some(output) => return output,
                None => {
                    self.flush().await;
                }
            }
        }
    }

    /// Number of waves flushed.
    pub fn waves(&self) -> usize {
        self.waves.load(Ordering::SeqCst)
    }

    /// Number of dispatches run.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.queue.lock().len())
            .field("waves", &self.waves())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use futures::future::join_all;
    use futures::FutureExt;
    use std::sync::atomic::AtomicBool;

    struct Resolve {
        target: Deferred<i32>,
        value: i32,
        runs: AtomicUsize,
    }

    impl Dispatch for Resolve {
        fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                self.target.resolve(Ok(self.value));
            })
        }
    }

    /// Counts registrations and resolves every waiter with the count seen at
    /// dispatch time.
    #[derive(Default)]
    struct Collect {
        registered: AtomicUsize,
        queued: AtomicBool,
        target: Deferred<usize>,
    }

    impl Collect {
        fn register(self: &Arc<Self>, scheduler: &Scheduler) -> Deferred<usize> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            if !self.queued.swap(true, Ordering::SeqCst) {
                scheduler.defer(self.clone());
            }
            self.target.clone()
        }
    }

    impl Dispatch for Collect {
        fn dispatch(self: Arc<Self>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let seen = self.registered.load(Ordering::SeqCst);
                self.target.resolve(Ok(seen));
            })
        }
    }

    #[test]
    fn test_resolves_once() {
        let deferred = Deferred::new();
        assert!(deferred.peek().is_none());
        assert!(deferred.resolve(Ok(1)));
        assert!(!deferred.resolve(Ok(2)));
        assert_eq!(deferred.peek(), Some(Ok(1)));
        assert!(deferred.is_resolved());
    }

    #[test]
    fn test_clones_share_slot() {
        let a: Deferred<i32> = Deferred::new();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Deferred::new()));

        b.resolve(Ok(5));
        assert_eq!(a.peek(), Some(Ok(5)));
    }

    #[tokio::test]
    async fn test_drive_flushes_stalled_future() {
        let scheduler = Scheduler::new();
        let deferred = Deferred::new();
        let work = Arc::new(Resolve {
            target: deferred.clone(),
            value: 21,
            runs: AtomicUsize::new(0),
        });
        scheduler.defer(work.clone());

        let output = scheduler
            .drive(deferred.clone().map(|result| result.map(|v| v * 2)))
            .await;

        assert_eq!(output, Ok(42));
        assert_eq!(work.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.waves(), 1);
        assert_eq!(scheduler.dispatched(), 1);
        assert!(!scheduler.has_pending());
    }

    #[tokio::test]
    async fn test_failure_reaches_continuations() {
        let scheduler = Scheduler::new();
        let deferred: Deferred<i32> = Deferred::new();
        deferred.resolve(Err(SourceError::new("boom").into()));

        let output = scheduler
            .drive(deferred.clone().then(|result| async move { result.map(|v| v + 1) }))
            .await;

        assert_eq!(output, Err(SourceError::new("boom").into()));
        assert_eq!(scheduler.waves(), 0);
    }

    #[tokio::test]
    async fn test_wave_waits_for_large_nested_joins() {
        let scheduler = Scheduler::new();
        let batch = Arc::new(Collect::default());

        let rows = scheduler
            .drive(join_all((0..40).map(|_| {
                let batch = Arc::clone(&batch);
                let scheduler = &scheduler;
                async move {
                    join_all((0..40).map(|_| {
                        let batch = Arc::clone(&batch);
                        async move { batch.register(scheduler).await }
                    }))
                    .await
                }
            })))
            .await;

        assert!(rows.iter().flatten().all(|seen| *seen == Ok(1600)));
        assert_eq!(scheduler.waves(), 1);
        assert_eq!(scheduler.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_work() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.flush().await, 0);
        assert_eq!(scheduler.waves(), 0);
    }
}
