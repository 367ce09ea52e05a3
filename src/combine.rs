//! Wiring for the derived promises returned by `map`, `and_then`, `filter`, `batch`, `fold`, `and`
//! and `merge`.
//!
//! Every combinator follows the same pattern: create a fresh core, tie its cancellation to the
//! source(s), then subscribe to the source(s) with `listen`/`on_close` and forward into the new
//! core. The `Link`s created for cancellation are stored in the derived core, so they live exactly
//! as long as the promise that needs them.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use crate::{
    buffer::BufferPolicy,
    cancel::{CancelToken, Link},
    core::{Core, Kind},
    sync::Mutex,
};

/// Sends `value` into a derived core. Failures can only be caused by the derived core's own buffer
/// policy, and there is no caller to report them to.
fn forward<T: Send + Sync + 'static>(target: &Core<T>, value: T) {
    if let Err(e) = target.send(value) {
        log::warn!("failed to forward value into derived {:?}: {e}", target.kind());
    }
}

fn finish<T: Send + Sync + 'static>(target: &Core<T>) {
    if let Err(e) = target.close() {
        log::warn!("failed to close derived {:?}: {e}", target.kind());
    }
}

/// Creates a core whose cancellation is joined with `source`.
fn derive<S, T>(source: &Core<S>, kind: Kind, policy: BufferPolicy) -> Arc<Core<T>>
where
    S: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    let target = Core::new(kind, policy);
    target.attach(CancelToken::join(source.token(), target.token()));
    target
}

/// Closes `target` when `close` has been called once for every participant counted in `pending`.
fn countdown<T: Send + Sync + 'static>(
    target: &Arc<Core<T>>,
    pending: &Arc<AtomicUsize>,
) -> impl Fn() + Send + Sync + 'static {
    let target = target.clone();
    let pending = pending.clone();
    move || {
        if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            finish(&target);
        }
    }
}

pub(crate) fn map<T, U, F>(source: &Core<T>, kind: Kind, map: F) -> Arc<Core<U>>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    let target = derive(source, kind, source.policy());

    let sink = target.clone();
    source.listen(Arc::new(move |value: &T| forward(&sink, map(value))));
    let sink = target.clone();
    source.on_close(Box::new(move || finish(&sink)));
    target
}

pub(crate) fn filter<T, F>(source: &Core<T>, kind: Kind, predicate: F) -> Arc<Core<T>>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let target = derive(source, kind, source.policy());

    let sink = target.clone();
    source.listen(Arc::new(move |value: &T| {
        if predicate(value) {
            forward(&sink, value.clone());
        }
    }));
    let sink = target.clone();
    source.on_close(Box::new(move || finish(&sink)));
    target
}

/// Flat-maps every value of `source` into an inner core created by `chain`.
///
/// The derived core is joined with every inner core until that inner core closes, so canceling the
/// result cancels the open inner promises, and canceling an inner promise cancels the result (and
/// through it, the source). The result closes once the source and every inner core have closed.
pub(crate) fn chain<T, U, F>(source: &Core<T>, kind: Kind, chain: F) -> Arc<Core<U>>
where
    T: Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(&T) -> Arc<Core<U>> + Send + Sync + 'static,
{
    let target = derive(source, kind, source.policy());
    // One for the source, plus one for every inner core.
    let pending = Arc::new(AtomicUsize::new(1));

    let sink = target.clone();
    let inner_pending = pending.clone();
    source.listen(Arc::new(move |value: &T| {
        let inner = chain(value);
        inner_pending.fetch_add(1, Ordering::AcqRel);
        // Owned by the inner close listener, so a finished inner core is unjoined again.
        let link = CancelToken::join(inner.token(), sink.token());

        let forward_sink = sink.clone();
        inner.listen(Arc::new(move |value: &U| forward(&forward_sink, value.clone())));
        let done = countdown(&sink, &inner_pending);
        inner.on_close(Box::new(move || {
            drop(link);
            done();
        }));
    }));
    let done = countdown(&target, &pending);
    source.on_close(Box::new(move || done()));
    target
}

/// Groups values of `source` into batches of `size`. A partial batch is flushed at close.
pub(crate) fn batch<T>(source: &Core<T>, kind: Kind, size: usize) -> Arc<Core<Vec<T>>>
where
    T: Clone + Send + Sync + 'static,
{
    assert_ne!(size, 0, "batch size must be at least 1");

    let target = derive(source, kind, source.policy());
    let pending = Arc::new(Mutex::new(Vec::with_capacity(size)));

    let sink = target.clone();
    let items = pending.clone();
    source.listen(Arc::new(move |value: &T| {
        let full = {
            let mut items = items.lock();
            items.push(value.clone());
            if items.len() == size {
                Some(mem::replace(&mut *items, Vec::with_capacity(size)))
            } else {
                None
            }
        };
        if let Some(full) = full {
            forward(&sink, full);
        }
    }));

    let sink = target.clone();
    source.on_close(Box::new(move || {
        let rest = mem::take(&mut *pending.lock());
        if !rest.is_empty() {
            forward(&sink, rest);
        }
        finish(&sink);
    }));
    target
}

/// Reduces all values of `source` into a single value, delivered when `source` closes.
pub(crate) fn fold<T, A, F>(source: &Core<T>, kind: Kind, seed: A, fold: F) -> Arc<Core<A>>
where
    T: Send + Sync + 'static,
    A: Send + Sync + 'static,
    F: Fn(A, &T) -> A + Send + Sync + 'static,
{
    let target = derive(source, kind, BufferPolicy::Last);
    let acc = Arc::new(Mutex::new(Some(seed)));

    let state = acc.clone();
    source.listen(Arc::new(move |value: &T| {
        let mut acc = state.lock();
        if let Some(current) = acc.take() {
            *acc = Some(fold(current, value));
        }
    }));

    let sink = target.clone();
    source.on_close(Box::new(move || {
        let result = acc.lock().take();
        if let Some(result) = result {
            forward(&sink, result);
        }
        finish(&sink);
    }));
    target
}

/// Pairs the first values of `a` and `b`.
///
/// The result fires once, as soon as both sources have delivered a value, pairing the most recent
/// value of each. It closes when both sources have closed.
pub(crate) fn and<T, U>(a: &Core<T>, b: &Core<U>, kind: Kind) -> Arc<Core<(T, U)>>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    struct Pair<T, U> {
        left: Option<T>,
        right: Option<U>,
        fired: bool,
    }

    impl<T: Clone, U: Clone> Pair<T, U> {
        fn ready(&mut self) -> Option<(T, U)> {
            if self.fired {
                return None;
            }
            match (&self.left, &self.right) {
                (Some(left), Some(right)) => {
                    self.fired = true;
                    Some((left.clone(), right.clone()))
                }
                _ => None,
            }
        }
    }

    let target = derive(a, kind, a.policy());
    target.attach(CancelToken::join(b.token(), target.token()));

    let pair = Arc::new(Mutex::new(Pair {
        left: None,
        right: None,
        fired: false,
    }));
    let pending = Arc::new(AtomicUsize::new(2));

    let sink = target.clone();
    let state = pair.clone();
    a.listen(Arc::new(move |value: &T| {
        let ready = {
            let mut pair = state.lock();
            pair.left = Some(value.clone());
            pair.ready()
        };
        if let Some(ready) = ready {
            forward(&sink, ready);
        }
    }));

    let sink = target.clone();
    b.listen(Arc::new(move |value: &U| {
        let ready = {
            let mut pair = pair.lock();
            pair.right = Some(value.clone());
            pair.ready()
        };
        if let Some(ready) = ready {
            forward(&sink, ready);
        }
    }));

    let done = countdown(&target, &pending);
    a.on_close(Box::new(move || done()));
    let done = countdown(&target, &pending);
    b.on_close(Box::new(move || done()));
    target
}

/// Forwards the values of every source into one core.
///
/// The result is canceled once *all* sources have been canceled, and closes once every source has
/// ended. A canceled source never closes, so it counts as ended at cancellation. Canceling the
/// result cancels every source.
pub(crate) fn merge<T>(sources: &[Arc<Core<T>>], kind: Kind, policy: BufferPolicy) -> Arc<Core<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let target = Core::new(kind, policy);
    if sources.is_empty() {
        finish(&target);
        return target;
    }

    let canceled = Arc::new(AtomicUsize::new(sources.len()));
    let pending = Arc::new(AtomicUsize::new(sources.len()));
    let mut link = Link::new();
    let mut ends = Vec::with_capacity(sources.len());
    for source in sources {
        let end = Arc::new(SourceEnd {
            // The link lives inside `target`, so this side must not own it.
            target: Arc::downgrade(&target),
            pending: pending.clone(),
            ended: AtomicBool::new(false),
        });
        ends.push(end.clone());

        let result = target.token().clone();
        let canceled = canceled.clone();
        link.watch(source.token(), move || {
            if canceled.fetch_sub(1, Ordering::AcqRel) == 1 {
                result.cancel();
            }
            end.end();
        });
    }
    let upstream: Vec<CancelToken> = sources.iter().map(|s| s.token().clone()).collect();
    link.watch(target.token(), move || {
        for token in upstream {
            token.cancel();
        }
    });
    target.attach(link);

    for (source, end) in sources.iter().zip(ends) {
        let sink = target.clone();
        source.listen(Arc::new(move |value: &T| forward(&sink, value.clone())));
        // Keeps the result alive until the source closes or is canceled.
        let keep = target.clone();
        source.on_close(Box::new(move || {
            end.end();
            drop(keep);
        }));
    }
    target
}

/// Tracks whether one merged source has ended, by closing or by being canceled.
struct SourceEnd<T> {
    target: Weak<Core<T>>,
    pending: Arc<AtomicUsize>,
    ended: AtomicBool,
}

impl<T: Send + Sync + 'static> SourceEnd<T> {
    fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(target) = self.target.upgrade() {
                finish(&target);
            }
        }
    }
}
