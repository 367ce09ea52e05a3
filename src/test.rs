//! Internal unit test utilities.

use std::{
    future::Future,
    pin::pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    thread::{self, Thread},
};

use crate::sync::Mutex;

/// Polls a future to completion on the current thread, parking it while the future is pending.
pub fn block_on<R, F: Future<Output = R>>(fut: F) -> R {
    struct Unparker(Thread);
    impl Wake for Unparker {
        fn wake(self: Arc<Self>) {
            self.0.unpark();
        }
    }

    let waker = Waker::from(Arc::new(Unparker(thread::current())));
    let mut cx = Context::from_waker(&waker);

    let mut fut = pin!(fut);
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            // Spurious wakeups just poll again.
            Poll::Pending => thread::park(),
        }
    }
}

/// Records everything delivered to the listeners it hands out.
pub struct Recorder<T> {
    values: Arc<Mutex<Vec<T>>>,
    closes: Arc<AtomicUsize>,
    /// Number of values recorded so far, readable without locking.
    pub count: Arc<AtomicUsize>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            closes: self.closes.clone(),
            count: self.count.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let values = self.values.clone();
        let count = self.count.clone();
        move |value: &T| {
            values.lock().push(value.clone());
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn close_listener(&self) -> impl FnOnce() + Send + 'static {
        let closes = self.closes.clone();
        move || {
            closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
