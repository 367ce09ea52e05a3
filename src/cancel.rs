//! Cooperative cancellation shared between promises.
//!
//! Every [`Promise`] and [`Progress`] owns a [`CancelToken`]. Combinators join the token of the
//! promise they create with the tokens of their sources, so that canceling any participant
//! cancels the whole graph.
//!
//! Joined tokens hold strong references to each other through their listener lists. That cycle is
//! owned by a [`Link`]: dropping the [`Link`] removes both listeners again, so the promise that
//! created the relationship decides how long it lasts.
//!
//! [`Promise`]: crate::Promise
//! [`Progress`]: crate::Progress

use std::{fmt, mem, sync::Arc};

use crate::sync::Mutex;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a listener registered with [`CancelToken::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A shared cancellation flag with listener fan-out.
///
/// Cloning a [`CancelToken`] yields another handle to the same flag. Once canceled, a token stays
/// canceled forever.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Mutex<TokenState>>,
}

struct TokenState {
    canceled: bool,
    next_id: u64,
    listeners: Vec<(ListenerId, Callback)>,
}

impl CancelToken {
    /// Creates a token that has not been canceled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TokenState {
                canceled: false,
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Cancels the token.
    ///
    /// Every registered listener is invoked exactly once, in registration order, and then
    /// forgotten. Calling this again has no effect.
    ///
    /// Listeners run on the calling thread after the token's lock has been released, so they may
    /// freely call back into this token (or into tokens joined with it).
    pub fn cancel(&self) {
        let listeners = {
            let mut state = self.inner.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            mem::take(&mut state.listeners)
        };

        log::trace!("cancel token canceled, notifying {} listeners", listeners.len());
        for (_, listener) in listeners {
            listener();
        }
    }

    /// Returns whether [`CancelToken::cancel`] has been called on this token or a token joined
    /// with it.
    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// Registers a listener that runs when the token is canceled.
    ///
    /// If the token is already canceled, `listener` is invoked immediately on the calling thread
    /// and [`None`] is returned. Otherwise the returned [`ListenerId`] can be passed to
    /// [`CancelToken::unlisten`].
    pub fn listen<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.canceled {
            drop(state);
            listener();
            return None;
        }

        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, Box::new(listener)));
        Some(id)
    }

    /// Removes a listener that has not run yet.
    ///
    /// Returns `false` if the listener was already invoked or removed.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let removed = {
            let mut state = self.inner.lock();
            let index = state.listeners.iter().position(|(lid, _)| *lid == id);
            index.map(|index| state.listeners.remove(index))
        };
        // The callback may own other promises, so it is dropped after the lock is released.
        let found = removed.is_some();
        drop(removed);
        found
    }

    /// Joins two tokens, so that canceling either one cancels the other.
    ///
    /// The relationship lasts for as long as the returned [`Link`] is alive. If either token is
    /// already canceled, the other one is canceled immediately.
    pub fn join(a: &CancelToken, b: &CancelToken) -> Link {
        let mut link = Link::new();
        let other = b.clone();
        link.watch(a, move || other.cancel());
        let other = a.clone();
        link.watch(b, move || other.cancel());
        link
    }

    /// Returns whether two handles refer to the same token.
    pub fn ptr_eq(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CancelToken")
            .field("canceled", &state.canceled)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// An owned set of cancel listeners, removed again when the [`Link`] is dropped.
///
/// [`CancelToken::join`] returns a [`Link`] holding both halves of the join. Combinators store the
/// links they create inside the promise they return, tying the lifetime of every cross-token
/// relationship to the promise that needs it.
#[must_use = "dropping a `Link` immediately removes the listeners it registered"]
#[derive(Default)]
pub struct Link {
    registrations: Vec<(CancelToken, ListenerId)>,
}

impl Link {
    /// Creates an empty [`Link`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` on `token` for the lifetime of this [`Link`].
    ///
    /// Like [`CancelToken::listen`], the listener runs immediately if `token` is already canceled.
    pub fn watch<F>(&mut self, token: &CancelToken, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(id) = token.listen(listener) {
            self.registrations.push((token.clone(), id));
        }
    }

    /// Returns the number of listeners that are still registered through this link.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if this link does not hold any registrations.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for (token, id) in self.registrations.drain(..) {
            token.unlisten(id);
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}
