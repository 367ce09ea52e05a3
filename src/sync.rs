//! A [`Mutex`] that ignores lock poisoning.
//!
//! Listener callbacks are user code and may panic while another thread holds a promise's lock.
//! Poisoning would turn that one panic into a cascade of unrelated `unwrap` failures on every
//! later `send`, `listen` and `cancel`, so poisoned guards are simply recovered.

use std::{
    fmt,
    sync::{self, MutexGuard, PoisonError},
};

pub(crate) struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub(crate) const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the mutex if that is possible without blocking.
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(sync::TryLockError::Poisoned(poison)) => Some(poison.into_inner()),
            Err(sync::TryLockError::WouldBlock) => None,
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(val) => s.field("data", &&*val),
            None => s.field("data", &"<locked>"),
        }
        .finish_non_exhaustive()
    }
}
