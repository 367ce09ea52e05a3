//! Multi-value streams.
//!
//! A [`Progress`] delivers any number of values over time until its [`Channel`] is closed. It
//! shares its listener semantics with [`Promise`]; the only differences are the default retention
//! policy ([`BufferPolicy::None`]) and the error reported after close ([`Error::ChannelClosed`],
//! since closing a channel is the normal way to end a stream).
//!
//! # Examples
//!
//! ```
//! use tidings::{BufferPolicy, Channel};
//!
//! let channel = Channel::with_policy(BufferPolicy::All);
//! let progress = channel.progress();
//!
//! let producer = std::thread::spawn(move || {
//!     for percent in [25, 50, 75, 100] {
//!         channel.send(percent).unwrap();
//!     }
//!     channel.close().unwrap();
//! });
//!
//! // `iter` replays what was retained, then blocks for the rest of the stream.
//! let seen: Vec<u32> = progress.iter().collect();
//! assert_eq!(seen, [25, 50, 75, 100]);
//! producer.join().unwrap();
//! ```

use std::{fmt, sync::Arc};

use crossbeam_channel::Receiver;

use crate::{
    buffer::BufferPolicy,
    cancel::CancelToken,
    combine,
    core::{Core, Kind},
    Error, Promise,
};

/// Creates a connected pair of [`Channel`] and [`Progress`] that retains nothing for late
/// listeners.
pub fn channel<T: Send + Sync + 'static>() -> (Channel<T>, Progress<T>) {
    let channel = Channel::new();
    let progress = channel.progress();
    (channel, progress)
}

/// The producer side of a [`Progress`] stream.
pub struct Channel<T> {
    core: Arc<Core<T>>,
}

impl<T: Send + Sync + 'static> Channel<T> {
    /// Creates a [`Channel`] whose stream retains nothing for late listeners.
    pub fn new() -> Self {
        Self::with_policy(BufferPolicy::None)
    }

    /// Creates a [`Channel`] whose stream replays values according to `policy`.
    pub fn with_policy(policy: BufferPolicy) -> Self {
        Self {
            core: Core::new(Kind::Progress, policy),
        }
    }

    pub fn progress(&self) -> Progress<T> {
        Progress {
            core: self.core.clone(),
        }
    }

    /// Delivers `value` to every listener of the stream, on the calling thread.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if [`Channel::close`] has been called.
    /// - [`Error::CapacityExceeded`] if the stream uses a full [`BufferPolicy::Fixed`] buffer.
    ///
    /// Values sent after cancellation are dropped and `Ok(())` is returned.
    pub fn send(&self, value: T) -> Result<(), Error> {
        self.core.send(value)
    }

    /// Ends the stream, running its close listeners once.
    ///
    /// Returns [`Error::ChannelClosed`] if the stream was already closed.
    pub fn close(&self) -> Result<(), Error> {
        self.core.close()
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
}

impl<T: Send + Sync + 'static> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Channel").field(&self.core).finish()
    }
}

/// A read-only handle to a stream of values.
///
/// See [`Promise`] for the listener semantics, which are identical.
pub struct Progress<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Progress<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T> fmt::Debug for Progress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Progress").field(&self.core).finish()
    }
}

impl<T: Send + Sync + 'static> Progress<T> {
    fn from_core(core: Arc<Core<T>>) -> Self {
        Self { core }
    }

    /// Registers `listener` for the values of this stream, replaying what the buffer retained.
    pub fn listen<F>(&self, listener: F) -> &Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.core.listen(Arc::new(listener));
        self
    }

    /// Registers `listener` to run once at the end of the stream.
    pub fn on_close<F>(&self, listener: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.on_close(Box::new(listener));
        self
    }

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

    pub fn map<U, F>(&self, map: F) -> Progress<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Progress::from_core(combine::map(&self.core, Kind::Progress, map))
    }

    /// Flattens the streams returned by `chain` into one stream.
    ///
    /// Cancellation is joined in both directions with this stream and with every inner stream. The
    /// result ends once this stream and every inner stream have ended.
    pub fn and_then<U, F>(&self, chain: F) -> Progress<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Progress<U> + Send + Sync + 'static,
    {
        Progress::from_core(combine::chain(&self.core, Kind::Progress, move |value| {
            chain(value).core
        }))
    }

    /// Reduces the stream to a single value.
    ///
    /// The returned promise is resolved with the final accumulator when the stream closes (with
    /// `seed` itself if no value was sent). Canceling either side cancels the other.
    pub fn fold<A, F>(&self, seed: A, fold: F) -> Promise<A>
    where
        A: Send + Sync + 'static,
        F: Fn(A, &T) -> A + Send + Sync + 'static,
    {
        Promise::from_core(combine::fold(&self.core, Kind::Promise, seed, fold))
    }

    pub fn convert<U>(&self) -> Progress<U>
    where
        T: Clone + Into<U>,
        U: Send + Sync + 'static,
    {
        self.map(|value: &T| value.clone().into())
    }

    /// Merges this stream with `other`. See [`Progress::merge`].
    pub fn or(&self, other: &Progress<T>) -> Progress<T>
    where
        T: Clone,
    {
        Progress::merge([self.clone(), other.clone()])
    }

    /// Interleaves the values of all `sources` as they arrive.
    ///
    /// The merged stream ends once every source has ended, and is canceled once every source has
    /// been canceled. Canceling the merged stream cancels all sources.
    pub fn merge<I>(sources: I) -> Progress<T>
    where
        I: IntoIterator<Item = Progress<T>>,
        T: Clone,
    {
        let cores: Vec<_> = sources.into_iter().map(|p| p.core).collect();
        let policy = cores.first().map_or(BufferPolicy::None, |c| c.policy());
        Progress::from_core(combine::merge(&cores, Kind::Progress, policy))
    }
}

impl<T: Clone + Send + Sync + 'static> Progress<T> {
    pub fn filter<F>(&self, predicate: F) -> Progress<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Progress::from_core(combine::filter(&self.core, Kind::Progress, predicate))
    }

    /// Groups the stream into batches of `size` values, flushing an incomplete batch at close.
    ///
    /// # Panics
    ///
    /// This method will panic if `size` is 0.
    pub fn batch(&self, size: usize) -> Progress<Vec<T>> {
        Progress::from_core(combine::batch(&self.core, Kind::Progress, size))
    }

    /// Returns a blocking iterator over the values of this stream.
    ///
    /// The iterator first yields the retained values, then blocks for each new one. It ends when
    /// the stream is closed or canceled.
    pub fn iter(&self) -> Iter<T> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.listen(move |value: &T| {
            sender.send(value.clone()).ok();
        });
        Iter { receiver }
    }
}

/// Just like a channel, a [`Progress`] can be iterated over, blocking for each value.
impl<T: Clone + Send + Sync + 'static> IntoIterator for &Progress<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

/// A blocking [`Iterator`] over the values of a [`Progress`].
///
/// Created by [`Progress::iter`].
pub struct Iter<T> {
    receiver: Receiver<T>,
}

impl<T> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

impl<T> fmt::Debug for Iter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("pending", &self.receiver.len())
            .finish()
    }
}
