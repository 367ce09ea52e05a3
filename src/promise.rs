use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use crate::{
    buffer::BufferPolicy,
    cancel::CancelToken,
    combine,
    core::{Core, Kind},
    sync::Mutex,
    Error,
};

/// Creates a connected pair of [`Deferred`] and [`Promise`] using the default
/// [`BufferPolicy::Last`].
pub fn deferred<T: Send + Sync + 'static>() -> (Deferred<T>, Promise<T>) {
    let deferred = Deferred::new();
    let promise = deferred.promise();
    (deferred, promise)
}

/// The producer side of a [`Promise`].
///
/// A [`Deferred`] is the only handle that can put values into its promise. It is typically moved
/// into the code computing the result, while [`Deferred::promise`] is handed to the consumer.
pub struct Deferred<T> {
    core: Arc<Core<T>>,
}

impl<T: Send + Sync + 'static> Deferred<T> {
    /// Creates a [`Deferred`] whose promise retains its most recent value for late listeners.
    pub fn new() -> Self {
        Self::with_policy(BufferPolicy::Last)
    }

    /// Creates a [`Deferred`] whose promise replays values according to `policy`.
    pub fn with_policy(policy: BufferPolicy) -> Self {
        Self {
            core: Core::new(Kind::Promise, policy),
        }
    }

    /// Returns the consumer handle of this [`Deferred`].
    pub fn promise(&self) -> Promise<T> {
        Promise {
            core: self.core.clone(),
        }
    }

    /// Delivers `value` to every listener of the promise, and retains it for late listeners as
    /// permitted by the buffer policy.
    ///
    /// Listeners are invoked on the calling thread before this method returns.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyClosed`] if the promise has been closed.
    /// - [`Error::CapacityExceeded`] if the promise uses a full [`BufferPolicy::Fixed`] buffer; the
    ///   value is not delivered in that case.
    ///
    /// If the promise has been canceled, `value` is dropped and `Ok(())` is returned.
    pub fn send(&self, value: T) -> Result<(), Error> {
        self.core.send(value)
    }

    /// Sends `value`, then closes the promise.
    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.send(value)?;
        self.close()
    }

    /// Closes the promise, running its close listeners once.
    ///
    /// Returns [`Error::AlreadyClosed`] if the promise was closed before. Closing a canceled
    /// promise does nothing.
    pub fn close(&self) -> Result<(), Error> {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Returns whether the consumer side has canceled the promise.
    ///
    /// Producers doing expensive work may check this to stop early.
    pub fn is_canceled(&self) -> bool {
        self.core.is_canceled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.core.token()
    }
}

impl<T: Send + Sync + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.core).finish()
    }
}

/// A read-only handle to a value that will be delivered later.
///
/// Consumers attach listeners with [`Promise::listen`] and [`Promise::on_close`]. A listener
/// attached after values were sent is first replayed whatever the promise's [`BufferPolicy`]
/// retained, so a slow consumer does not miss the result. No listener ever runs after the promise
/// is canceled.
///
/// [`Promise`] is cheap to clone; all clones refer to the same promise.
pub struct Promise<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Promise").field(&self.core).finish()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub(crate) fn from_core(core: Arc<Core<T>>) -> Self {
        Self { core }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<Core<T>> {
        &self.core
    }

    /// Creates a promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let deferred = Deferred::new();
        let promise = deferred.promise();
        // A fresh `Last` promise can neither be closed nor full.
        let _ = deferred.resolve(value);
        promise
    }

    /// Registers `listener` to receive the promise's values.
    ///
    /// Any values retained by the buffer are replayed to `listener` immediately, in the order they
    /// were sent. If the promise is still open, `listener` also receives every value sent later.
    /// This can be called at any time; after cancellation it does nothing.
    pub fn listen<F>(&self, listener: F) -> &Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.listen(Arc::new(listener));
        self
    }

    /// Registers `listener` to run once when the promise closes.
    ///
    /// If the promise is already closed, `listener` runs immediately. It never runs if the promise
    /// is canceled before it closes.
    pub fn on_close<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.on_close(Box::new(listener));
        self
    }

    /// Cancels the promise, and every promise whose cancellation is joined with it.
    ///
    /// All listeners are dropped without being invoked again, and further values are discarded.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn is_canceled(&self) -> bool {
        self.core.is_canceled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.core.token()
    }

    pub fn policy(&self) -> BufferPolicy {
        self.core.policy()
    }

    /// Returns a promise of `map` applied to each value of this promise.
    pub fn map<U, F>(&self, map: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Promise::from_core(combine::map(&self.core, Kind::Promise, map))
    }

    /// Returns a promise that delivers the values of the promises returned by `chain`.
    ///
    /// The returned promise is canceled together with this promise and with every promise `chain`
    /// produced, in both directions. It closes once this promise and all chained promises have
    /// closed.
    pub fn and_then<U, F>(&self, chain: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Promise<U> + Send + Sync + 'static,
    {
        Promise::from_core(combine::chain(&self.core, Kind::Promise, move |value| {
            chain(value).core
        }))
    }

    /// Converts each value into `U`.
    ///
    /// This is the way to view a `Promise<T>` as a promise of a more general type, without any
    /// unchecked casts.
    pub fn convert<U>(&self) -> Promise<U>
    where
        T: Clone + Into<U>,
        U: Send + Sync + 'static,
    {
        self.map(|value: &T| value.clone().into())
    }

    /// Pairs the first value of this promise with the first value of `other`.
    ///
    /// The returned promise delivers one pair once both promises have delivered a value, and closes
    /// when both have closed. Canceling any of the three cancels the others.
    pub fn and<U>(&self, other: &Promise<U>) -> Promise<(T, U)>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
    {
        Promise::from_core(combine::and(&self.core, &other.core, Kind::Promise))
    }

    /// Merges this promise with `other`. See [`Promise::merge`].
    pub fn or(&self, other: &Promise<T>) -> Promise<T>
    where
        T: Clone,
    {
        Promise::merge([self.clone(), other.clone()])
    }

    /// Returns a promise that delivers every value of every promise in `sources`.
    ///
    /// Values are forwarded as they arrive; their order is only preserved relative to each source.
    /// The merged promise closes once all sources have closed, and is only canceled once *all*
    /// sources have been canceled. Canceling the merged promise cancels every source.
    ///
    /// The merged promise uses the buffer policy of the first source ([`BufferPolicy::Last`] if
    /// there are none). Merging zero promises yields a closed promise.
    pub fn merge<I>(sources: I) -> Promise<T>
    where
        I: IntoIterator<Item = Promise<T>>,
        T: Clone,
    {
        let cores: Vec<_> = sources.into_iter().map(|p| p.core).collect();
        let policy = cores.first().map_or(BufferPolicy::Last, |c| c.policy());
        Promise::from_core(combine::merge(&cores, Kind::Promise, policy))
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Returns a promise that only delivers the values for which `predicate` returns `true`.
    pub fn filter<F>(&self, predicate: F) -> Promise<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Promise::from_core(combine::filter(&self.core, Kind::Promise, predicate))
    }

    /// Groups the values of this promise into batches of `size`.
    ///
    /// When this promise closes, any incomplete batch is delivered before the returned promise
    /// closes.
    ///
    /// # Panics
    ///
    /// This method will panic if `size` is 0.
    pub fn batch(&self, size: usize) -> Promise<Vec<T>> {
        Promise::from_core(combine::batch(&self.core, Kind::Promise, size))
    }

    /// Blocks the calling thread until the promise delivers a value, and returns it.
    ///
    /// If values were already retained, the first retained one is returned right away. If the
    /// promise closes or is canceled without delivering a value, [`Error::NoValue`] is returned
    /// instead.
    pub fn block(&self) -> Result<T, Error> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        // The sender lives inside the listener. Once the promise closes or is canceled, the
        // listener is dropped, which disconnects the receiver.
        self.listen(move |value: &T| {
            sender.send(value.clone()).ok();
        });
        receiver.recv().map_err(|_| Error::NoValue)
    }

    /// Asynchronously waits for the promise to deliver a value.
    ///
    /// This is the `async` counterpart of [`Promise::block`] and does not depend on any particular
    /// async runtime.
    pub fn wait(&self) -> Wait<T> {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            done: false,
            waker: None,
        }));
        let guard = SlotGuard(slot.clone());
        self.listen(move |value: &T| guard.fill(value));
        Wait { slot }
    }
}

struct Slot<T> {
    value: Option<T>,
    done: bool,
    waker: Option<Waker>,
}

/// Owned by the listener registered in [`Promise::wait`]; dropping it marks the wait as finished.
struct SlotGuard<T>(Arc<Mutex<Slot<T>>>);

impl<T: Clone> SlotGuard<T> {
    fn fill(&self, value: &T) {
        let waker = {
            let mut slot = self.0.lock();
            if slot.value.is_some() || slot.done {
                return;
            }
            slot.value = Some(value.clone());
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        let waker = {
            let mut slot = self.0.lock();
            slot.done = true;
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Future returned by [`Promise::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Future for Wait<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        if let Some(value) = slot.value.take() {
            slot.done = true;
            return Poll::Ready(Ok(value));
        }
        if slot.done {
            return Poll::Ready(Err(Error::NoValue));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, thread, time::Duration};

    use crate::test::{block_on, Recorder};

    use super::*;

    fn assert_send<T: Send + Sync>() {}

    #[test]
    fn handles_are_send() {
        assert_send::<Promise<()>>();
        assert_send::<Deferred<()>>();
    }

    #[test]
    fn listener_receives_values_in_order() {
        let (deferred, promise) = deferred();
        let first = Recorder::new();
        let second = Recorder::new();
        promise.listen(first.listener()).listen(second.listener());

        deferred.send(1).unwrap();
        deferred.send(2).unwrap();
        assert_eq!(first.values(), [1, 2]);
        assert_eq!(second.values(), [1, 2]);
    }

    #[test]
    fn last_policy_replays_most_recent() {
        for n in 1..6 {
            let (deferred, promise) = deferred();
            for i in 0..n {
                deferred.send(i).unwrap();
            }
            let rec = Recorder::new();
            promise.listen(rec.listener());
            assert_eq!(rec.values(), [n - 1]);
        }
    }

    #[test]
    fn all_policy_replays_everything() {
        for n in 0..6 {
            let deferred = Deferred::with_policy(BufferPolicy::All);
            for i in 0..n {
                deferred.send(i).unwrap();
            }
            let rec = Recorder::new();
            deferred.promise().listen(rec.listener());
            assert_eq!(rec.values(), (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn none_policy_replays_nothing() {
        let deferred = Deferred::with_policy(BufferPolicy::None);
        deferred.send(1).unwrap();
        deferred.send(2).unwrap();

        let rec = Recorder::new();
        deferred.promise().listen(rec.listener());
        assert!(rec.values().is_empty());

        deferred.send(3).unwrap();
        assert_eq!(rec.values(), [3]);
    }

    #[test]
    fn late_listener_after_close() {
        let (deferred, promise) = deferred();
        deferred.resolve("done").unwrap();
        assert!(promise.is_closed());

        let rec = Recorder::new();
        promise.listen(rec.listener());
        assert_eq!(rec.values(), ["done"]);

        let closed = Recorder::<()>::new();
        promise.on_close(closed.close_listener());
        assert_eq!(closed.closes(), 1);
    }

    #[test]
    fn close_listeners_fire_once() {
        let (deferred, promise) = deferred::<i32>();
        let rec = Recorder::<()>::new();
        promise.on_close(rec.close_listener());
        assert_eq!(rec.closes(), 0);

        deferred.close().unwrap();
        assert_eq!(rec.closes(), 1);
        assert_eq!(deferred.close(), Err(Error::AlreadyClosed));
        assert_eq!(rec.closes(), 1);
    }

    #[test]
    fn send_after_close_fails() {
        let (deferred, _promise) = deferred();
        deferred.resolve(1).unwrap();
        assert_eq!(deferred.send(2), Err(Error::AlreadyClosed));
        assert_eq!(deferred.resolve(3), Err(Error::AlreadyClosed));
    }

    #[test]
    fn fixed_policy_rejects_overflow() {
        let deferred = Deferred::with_policy(BufferPolicy::Fixed(1));
        let rec = Recorder::new();
        deferred.promise().listen(rec.listener());

        deferred.send(1).unwrap();
        assert_eq!(
            deferred.send(2),
            Err(Error::CapacityExceeded { capacity: 1 })
        );
        assert_eq!(rec.values(), [1]);
    }

    #[test]
    fn cancel_before_listen() {
        let (deferred, promise) = deferred();
        promise.cancel();

        let rec = Recorder::new();
        promise.listen(rec.listener()).on_close(rec.close_listener());
        deferred.send(1).unwrap();
        deferred.close().unwrap();

        assert!(rec.values().is_empty());
        assert_eq!(rec.closes(), 0);
        assert!(promise.is_canceled());
        assert!(deferred.is_canceled());
    }

    #[test]
    fn cancel_stops_delivery() {
        let deferred = Deferred::with_policy(BufferPolicy::All);
        let promise = deferred.promise();
        let rec = Recorder::new();
        promise.listen(rec.listener());

        deferred.send(1).unwrap();
        promise.cancel();
        deferred.send(2).unwrap();
        deferred.resolve(3).unwrap();

        assert!(promise.is_canceled());
        assert_eq!(rec.values(), [1]);
        // Values buffered before cancellation are not replayed either.
        let late = Recorder::new();
        promise.listen(late.listener());
        assert!(late.values().is_empty());
    }

    #[test]
    fn listener_can_reenter_promise() {
        let deferred = Arc::new(Deferred::with_policy(BufferPolicy::All));
        let promise = deferred.promise();
        let rec = Recorder::new();
        let inner = rec.clone();
        let again = promise.clone();
        let producer = deferred.clone();
        promise.listen(move |value: &i32| {
            if *value == 1 {
                // Re-entrant send and listen from inside a listener must not deadlock.
                producer.send(2).unwrap();
                again.listen(inner.listener());
            }
        });
        deferred.send(1).unwrap();
        assert_eq!(rec.values(), [1, 2]);
    }

    #[test]
    fn resolved() {
        let promise = Promise::resolved(5);
        assert!(promise.is_closed());
        assert_eq!(promise.block(), Ok(5));
    }

    #[test]
    fn block_across_threads() {
        let (deferred, promise) = deferred();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            deferred.resolve(String::from("result")).unwrap();
        });
        assert_eq!(promise.block(), Ok(String::from("result")));
        producer.join().unwrap();
    }

    #[test]
    fn block_without_value() {
        let (deferred, promise) = deferred::<()>();
        deferred.close().unwrap();
        assert_eq!(promise.block(), Err(Error::NoValue));

        let (_deferred, promise) = super::deferred::<()>();
        let canceler = promise.clone();
        let bg = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            canceler.cancel();
        });
        assert_eq!(promise.block(), Err(Error::NoValue));
        bg.join().unwrap();
    }

    #[test]
    fn wait() {
        let (deferred, promise) = deferred();
        let wait = promise.wait();
        let bg = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            deferred.resolve(42).unwrap();
        });
        assert_eq!(block_on(wait), Ok(42));
        bg.join().unwrap();

        let (deferred, promise) = super::deferred::<i32>();
        let wait = promise.wait();
        deferred.close().unwrap();
        assert_eq!(block_on(wait), Err(Error::NoValue));
    }

    #[test]
    fn map_and_filter() {
        let deferred = Deferred::with_policy(BufferPolicy::All);
        let rec = Recorder::new();
        deferred
            .promise()
            .filter(|v: &i32| v % 2 == 0)
            .map(|v: &i32| v * 10)
            .listen(rec.listener())
            .on_close(rec.close_listener());

        for i in 0..5 {
            deferred.send(i).unwrap();
        }
        deferred.close().unwrap();
        assert_eq!(rec.values(), [0, 20, 40]);
        assert_eq!(rec.closes(), 1);
    }

    #[test]
    fn derived_promise_keeps_policy() {
        let deferred = Deferred::<i32>::with_policy(BufferPolicy::Ring(3));
        let mapped = deferred.promise().map(|v: &i32| *v);
        assert_eq!(mapped.policy(), BufferPolicy::Ring(3));
    }

    #[test]
    fn map_cancellation_is_joined() {
        let (deferred, promise) = deferred::<i32>();
        let mapped = promise.map(|v: &i32| v + 1);
        mapped.cancel();
        assert!(promise.is_canceled());
        assert!(deferred.is_canceled());

        let (_deferred, promise) = super::deferred::<i32>();
        let mapped = promise.map(|v: &i32| v + 1);
        promise.cancel();
        assert!(mapped.is_canceled());
    }

    #[test]
    fn and_then_chains_inner_promise() {
        let (outer, promise) = deferred::<i32>();
        let (inner, inner_promise) = deferred::<String>();
        let rec = Recorder::new();
        let chained = promise.and_then(move |_: &i32| inner_promise.clone());
        chained.listen(rec.listener()).on_close(rec.close_listener());

        outer.resolve(1).unwrap();
        assert_eq!(rec.closes(), 0);
        inner.resolve("inner".to_string()).unwrap();
        assert_eq!(rec.values(), ["inner".to_string()]);
        assert_eq!(rec.closes(), 1);
    }

    #[test]
    fn and_then_cancels_inner_with_outer() {
        let (outer, promise) = deferred::<i32>();
        let (_inner, inner_promise) = deferred::<i32>();
        let captured = inner_promise.clone();
        let chained = promise.and_then(move |_: &i32| captured.clone());
        outer.send(1).unwrap();

        promise.cancel();
        assert!(chained.is_canceled());
        assert!(inner_promise.is_canceled());
    }

    #[test]
    fn and_then_cancels_outer_with_inner() {
        let (outer, promise) = deferred::<i32>();
        let (_inner, inner_promise) = deferred::<i32>();
        let captured = inner_promise.clone();
        let chained = promise.and_then(move |_: &i32| captured.clone());
        outer.send(1).unwrap();

        inner_promise.cancel();
        assert!(chained.is_canceled());
        assert!(promise.is_canceled());
    }

    #[test]
    fn batch_flushes_remainder() {
        let deferred = Deferred::with_policy(BufferPolicy::All);
        let batches = Recorder::new();
        deferred
            .promise()
            .batch(2)
            .listen(batches.listener())
            .on_close(batches.close_listener());

        for word in ["one", "two", "three", "four", "five"] {
            deferred.send(word).unwrap();
        }
        assert_eq!(batches.values(), [vec!["one", "two"], vec!["three", "four"]]);
        deferred.close().unwrap();
        assert_eq!(
            batches.values(),
            [vec!["one", "two"], vec!["three", "four"], vec!["five"]]
        );
        assert_eq!(batches.closes(), 1);
    }

    #[test]
    #[should_panic = "batch size must be at least 1"]
    fn batch_of_zero() {
        let (_deferred, promise) = deferred::<i32>();
        promise.batch(0);
    }

    #[test]
    fn and_pairs_once() {
        let (d1, p1) = deferred::<&str>();
        let (d2, p2) = deferred::<i32>();
        let rec = Recorder::new();
        p1.and(&p2).listen(rec.listener()).on_close(rec.close_listener());

        d1.resolve("success1").unwrap();
        assert!(rec.values().is_empty());
        d2.resolve(0).unwrap();
        assert_eq!(rec.values(), [("success1", 0)]);
        assert_eq!(rec.closes(), 1);
    }

    #[test]
    fn and_cancellation() {
        let (_d1, p1) = deferred::<i32>();
        let (_d2, p2) = deferred::<i32>();
        let both = p1.and(&p2);
        p2.cancel();
        assert!(both.is_canceled());
        assert!(p1.is_canceled());
    }

    #[test]
    fn merge_forwards_all_values() {
        let (d1, p1) = deferred();
        let (d2, p2) = deferred();
        let rec = Recorder::new();
        p1.or(&p2).listen(rec.listener()).on_close(rec.close_listener());

        d2.resolve("second").unwrap();
        assert_eq!(rec.closes(), 0);
        d1.resolve("first").unwrap();
        assert_eq!(rec.values(), ["second", "first"]);
        assert_eq!(rec.closes(), 1);
    }

    #[test]
    fn merge_cancels_when_all_sources_cancel() {
        let (_d1, p1) = deferred::<i32>();
        let (_d2, p2) = deferred::<i32>();
        let merged = Promise::merge([p1.clone(), p2.clone()]);

        p1.cancel();
        assert!(!merged.is_canceled());
        p2.cancel();
        assert!(merged.is_canceled());
    }

    #[test]
    fn merge_closes_after_canceled_source() {
        let (_d1, p1) = deferred::<i32>();
        let (d2, p2) = deferred::<i32>();
        let merged = p1.or(&p2);

        p1.cancel();
        assert!(!merged.is_canceled());
        d2.resolve(7).unwrap();
        assert!(merged.is_closed());
        assert_eq!(merged.block(), Ok(7));
    }

    #[test]
    fn merge_counts_each_source_once() {
        let (d1, p1) = deferred::<i32>();
        let (d2, p2) = deferred::<i32>();
        let (d3, p3) = deferred::<i32>();
        let merged = Promise::merge([p1.clone(), p2, p3]);

        // Canceling a source that already closed must not end it a second time.
        d1.close().unwrap();
        p1.cancel();
        d2.close().unwrap();
        assert!(!merged.is_closed());
        assert!(!merged.is_canceled());

        d3.close().unwrap();
        assert!(merged.is_closed());
    }

    #[test]
    fn merge_cancel_reaches_sources() {
        let (_d1, p1) = deferred::<i32>();
        let (_d2, p2) = deferred::<i32>();
        let merged = Promise::merge([p1.clone(), p2.clone()]);
        merged.cancel();
        assert!(p1.is_canceled());
        assert!(p2.is_canceled());
    }

    #[test]
    fn merge_of_nothing_is_closed() {
        let merged = Promise::<i32>::merge([]);
        assert!(merged.is_closed());
        assert_eq!(merged.block(), Err(Error::NoValue));
    }

    #[test]
    fn convert() {
        let (deferred, promise) = deferred::<u8>();
        let wide: Promise<u32> = promise.convert();
        deferred.resolve(200).unwrap();
        assert_eq!(wide.block(), Ok(200u32));
    }

    #[test]
    fn derived_promises_are_released() {
        let (deferred, promise) = deferred::<i32>();
        let mapped = promise.map(|v: &i32| *v);
        let weak = Arc::downgrade(mapped.core());
        drop(mapped);
        // Still referenced by the source's listener.
        assert!(weak.upgrade().is_some());

        deferred.close().unwrap();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn concurrent_send_and_cancel() {
        let deferred = Arc::new(Deferred::with_policy(BufferPolicy::None));
        let promise = deferred.promise();
        let rec = Recorder::new();
        promise.listen(rec.listener());

        let producer = {
            let deferred = deferred.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    deferred.send(i).unwrap();
                }
            })
        };
        thread::sleep(Duration::from_millis(1));
        promise.cancel();
        let seen = rec.count.load(Ordering::SeqCst);
        producer.join().unwrap();

        // At most the one send that was already in flight completes after `cancel` returns.
        assert!(rec.count.load(Ordering::SeqCst) <= seen + 1);
        let values = rec.values();
        assert!(values.iter().copied().eq(0..values.len() as i32));
    }
}
