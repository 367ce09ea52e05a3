//! The state machine shared by [`Promise`] and [`Progress`].
//!
//! Both handle families are thin wrappers around an `Arc<Core<T>>`. They differ only in the error
//! reported after close and in their default buffer policy.
//!
//! Locking discipline: the state mutex is only held while the state is inspected or mutated.
//! Listener callbacks are always invoked after the guard is dropped, and callbacks removed from the
//! state are dropped after the guard is released too, since dropping one may release the last
//! reference to another promise.
//!
//! [`Promise`]: crate::Promise
//! [`Progress`]: crate::Progress

use std::{
    collections::VecDeque,
    fmt, mem,
    sync::{Arc, Weak},
};

use crate::{
    buffer::{BufferPolicy, PromiseBuffer},
    cancel::{CancelToken, Link},
    sync::Mutex,
    Error,
};

pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
pub(crate) type CloseListener = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Promise,
    Progress,
}

impl Kind {
    fn closed_error(self) -> Error {
        match self {
            Kind::Promise => Error::AlreadyClosed,
            Kind::Progress => Error::ChannelClosed,
        }
    }
}

pub(crate) struct Core<T> {
    kind: Kind,
    token: CancelToken,
    state: Arc<Mutex<State<T>>>,
    /// Cancellation relationships created by combinators on behalf of this core.
    links: Mutex<Vec<Link>>,
}

struct State<T> {
    buffer: PromiseBuffer<Arc<T>>,
    listeners: Vec<Arc<Subscriber<T>>>,
    close_listeners: Vec<CloseListener>,
    closed: bool,
}

impl<T> State<T> {
    /// Empties the state after cancellation. The removed callbacks are returned so that the caller
    /// can drop them outside the lock.
    fn clear(&mut self) -> (Vec<Arc<Subscriber<T>>>, Vec<CloseListener>) {
        self.buffer.clear();
        (
            mem::take(&mut self.listeners),
            mem::take(&mut self.close_listeners),
        )
    }
}

/// A registered listener.
///
/// While a new subscriber is being replayed the buffered values, live values sent concurrently are
/// queued in `backlog` and delivered after the replay, so that the listener observes values in the
/// order they were sent.
struct Subscriber<T> {
    listener: Listener<T>,
    backlog: Mutex<Option<VecDeque<Arc<T>>>>,
}

impl<T> Subscriber<T> {
    fn deliver(&self, value: &Arc<T>) {
        if let Some(backlog) = self.backlog.lock().as_mut() {
            backlog.push_back(value.clone());
            return;
        }
        (self.listener)(&**value);
    }

    fn replay(&self, values: &[Arc<T>]) {
        for value in values {
            (self.listener)(&**value);
        }
        loop {
            let next = {
                let mut backlog = self.backlog.lock();
                match backlog.as_mut().and_then(VecDeque::pop_front) {
                    Some(next) => next,
                    None => {
                        *backlog = None;
                        return;
                    }
                }
            };
            (self.listener)(&*next);
        }
    }
}

impl<T: Send + Sync + 'static> Core<T> {
    pub(crate) fn new(kind: Kind, policy: BufferPolicy) -> Arc<Self> {
        let token = CancelToken::new();
        let state = Arc::new(Mutex::new(State {
            buffer: PromiseBuffer::new(policy),
            listeners: Vec::new(),
            close_listeners: Vec::new(),
            closed: false,
        }));

        // The token never owns the state it guards; it only clears it if it's still around.
        let weak: Weak<Mutex<State<T>>> = Arc::downgrade(&state);
        token.listen(move || {
            if let Some(state) = weak.upgrade() {
                let discarded = state.lock().clear();
                drop(discarded);
            }
        });

        Arc::new(Self {
            kind,
            token,
            state,
            links: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    pub(crate) fn policy(&self) -> BufferPolicy {
        self.state.lock().buffer.policy()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    /// Keeps `link` alive for as long as this core exists.
    pub(crate) fn attach(&self, link: Link) {
        if !link.is_empty() {
            self.links.lock().push(link);
        }
    }

    /// Buffers `value` and delivers it to every current listener, in registration order.
    ///
    /// After cancellation, values are dropped silently.
    pub(crate) fn send(&self, value: T) -> Result<(), Error> {
        let value = Arc::new(value);
        let listeners = {
            let mut state = self.state.lock();
            if self.token.is_canceled() {
                log::debug!("dropping value sent to canceled {:?}", self.kind);
                return Ok(());
            }
            if state.closed {
                return Err(self.kind.closed_error());
            }
            state.buffer.add(value.clone())?;
            state.listeners.clone()
        };

        for subscriber in &listeners {
            subscriber.deliver(&value);
        }
        Ok(())
    }

    /// Marks the core as closed and runs the close listeners once.
    ///
    /// Value listeners are released, since nothing can be delivered to them anymore.
    pub(crate) fn close(&self) -> Result<(), Error> {
        let (listeners, close_listeners) = {
            let mut state = self.state.lock();
            if self.token.is_canceled() {
                return Ok(());
            }
            if state.closed {
                return Err(self.kind.closed_error());
            }
            state.closed = true;
            (
                mem::take(&mut state.listeners),
                mem::take(&mut state.close_listeners),
            )
        };

        log::trace!("{:?} closed", self.kind);
        drop(listeners);
        for listener in close_listeners {
            listener();
        }
        Ok(())
    }

    /// Replays the buffered values to `listener`, then registers it for future values unless the
    /// core is already closed.
    ///
    /// Nothing is replayed or registered once the core is canceled.
    pub(crate) fn listen(&self, listener: Listener<T>) {
        let subscriber = Arc::new(Subscriber {
            listener,
            backlog: Mutex::new(Some(VecDeque::new())),
        });
        let replay = {
            let mut state = self.state.lock();
            if self.token.is_canceled() {
                return;
            }
            let replay = state.buffer.to_vec();
            if !state.closed {
                state.listeners.push(subscriber.clone());
            }
            replay
        };

        subscriber.replay(&replay);
    }

    /// Runs `listener` once the core closes, or immediately if it already has.
    ///
    /// `listener` never runs if the core is canceled first.
    pub(crate) fn on_close(&self, listener: CloseListener) {
        let mut state = self.state.lock();
        if self.token.is_canceled() {
            return;
        }
        if state.closed {
            drop(state);
            listener();
        } else {
            state.close_listeners.push(listener);
        }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

impl<T> fmt::Debug for Core<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Core");
        s.field("kind", &self.kind)
            .field("canceled", &self.token.is_canceled());
        match self.state.try_lock() {
            Some(state) => s
                .field("closed", &state.closed)
                .field("policy", &state.buffer.policy())
                .field("buffered", &state.buffer.len())
                .field("listeners", &state.listeners.len()),
            None => s.field("state", &"<locked>"),
        }
        .finish()
    }
}
