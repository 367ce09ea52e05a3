//! The [`Outcome`] of a producer task.

use std::fmt;

use crate::Error;

/// Which side of an [`Outcome`] is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Success,
    Error,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Success => "a success",
            Variant::Error => "an error",
        })
    }
}

/// Either a success value or an error, delivered as a regular value through a [`Promise`].
///
/// Producer code running on another thread reports failure by resolving its promise with
/// [`Outcome::Error`] instead of unwinding. Consumers inspect the outcome in their listener, or
/// convert it back into a [`Result`] with [`Outcome::get`].
///
/// [`Promise`]: crate::Promise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome<T, E> {
    Success(T),
    Error(E),
}

impl<T, E> Outcome<T, E> {
    #[inline]
    pub fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    #[inline]
    pub fn error(error: E) -> Self {
        Outcome::Error(error)
    }

    pub fn variant(&self) -> Variant {
        match self {
            Outcome::Success(_) => Variant::Success,
            Outcome::Error(_) => Variant::Error,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    /// Converts the outcome into a [`Result`], so that the stored error can be propagated with `?`.
    pub fn get(self) -> Result<T, E> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }

    /// Returns the success value.
    ///
    /// Fails with [`Error::StateMismatch`] if this is an [`Outcome::Error`].
    pub fn get_success(&self) -> Result<&T, Error> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Error(_) => Err(Error::StateMismatch {
                expected: Variant::Success,
                found: Variant::Error,
            }),
        }
    }

    /// Returns the error value.
    ///
    /// Fails with [`Error::StateMismatch`] if this is an [`Outcome::Success`].
    pub fn get_error(&self) -> Result<&E, Error> {
        match self {
            Outcome::Error(error) => Ok(error),
            Outcome::Success(_) => Err(Error::StateMismatch {
                expected: Variant::Error,
                found: Variant::Success,
            }),
        }
    }

    pub fn as_ref(&self) -> Outcome<&T, &E> {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Error(error) => Outcome::Error(error),
        }
    }

    /// Transforms the success value, passing an error through unchanged.
    pub fn map_success<U, F: FnOnce(T) -> U>(self, map: F) -> Outcome<U, E> {
        match self {
            Outcome::Success(value) => Outcome::Success(map(value)),
            Outcome::Error(error) => Outcome::Error(error),
        }
    }

    /// Transforms the error value, passing a success through unchanged.
    pub fn map_error<F2, F: FnOnce(E) -> F2>(self, map: F) -> Outcome<T, F2> {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Error(error) => Outcome::Error(map(error)),
        }
    }

    /// Replaces a success with the outcome computed by `chain`; errors pass through.
    ///
    /// This lets a step that can itself fail turn a success into an error.
    pub fn and_then_success<U, F>(self, chain: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Outcome<U, E>,
    {
        match self {
            Outcome::Success(value) => chain(value),
            Outcome::Error(error) => Outcome::Error(error),
        }
    }

    /// Replaces an error with the outcome computed by `chain`; successes pass through.
    ///
    /// This is how an error can be recovered into a success.
    pub fn or_else_error<F2, F>(self, chain: F) -> Outcome<T, F2>
    where
        F: FnOnce(E) -> Outcome<T, F2>,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Error(error) => chain(error),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Error(error),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        outcome.get()
    }
}
