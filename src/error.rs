use crate::outcome::Variant;

/// Errors signaled by promises, progress streams, buffers and [`Outcome`]s.
///
/// Every variant except [`Error::NoValue`] describes a programming mistake on the caller's side
/// (using a producer handle after closing it, overfilling a fixed buffer, reading the wrong side of
/// an outcome). None of them are retried by the library.
///
/// [`Outcome`]: crate::Outcome
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A value was sent to (or the close was requested on) a [`Deferred`] that was already closed.
    ///
    /// [`Deferred`]: crate::Deferred
    #[error("promise has already been closed")]
    AlreadyClosed,

    /// A [`Channel`] was used after the end of its stream was signaled.
    ///
    /// [`Channel`]: crate::Channel
    #[error("channel has been closed")]
    ChannelClosed,

    /// A [`BufferPolicy::Fixed`] buffer was asked to retain more values than it can hold.
    ///
    /// [`BufferPolicy::Fixed`]: crate::BufferPolicy::Fixed
    #[error("buffer capacity of {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    /// The wrong side of an [`Outcome`] was accessed.
    ///
    /// [`Outcome`]: crate::Outcome
    #[error("expected {expected} outcome, found {found}")]
    StateMismatch { expected: Variant, found: Variant },

    /// A promise was closed or canceled before it delivered a value to a waiting consumer.
    #[error("promise ended without delivering a value")]
    NoValue,
}
