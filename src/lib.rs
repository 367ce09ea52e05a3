//! Push-based promises and progress streams with replay buffers and joinable cancellation.
//!
//! # Overview
//!
//! This library features two consumer-facing types: [`Promise`] and [`Progress`]. Both are
//! *push-based*: values are delivered to listeners as soon as the producer sends them, on the
//! producer's thread. There is no polling, and the library never spawns threads behind your back.
//!
//! ## Producers and consumers
//!
//! Each consumer handle has a producer counterpart: [`Deferred`] for [`Promise`], and [`Channel`]
//! for [`Progress`]. The producer sends values and eventually closes; any number of cloned consumer
//! handles observe them.
//!
//! A [`Promise`] conventionally delivers a single value (see [`Deferred::resolve`]), while a
//! [`Progress`] delivers a stream of values until its [`Channel`] is closed.
//!
//! ## Replay
//!
//! Listeners that register late are not left empty-handed: every producer keeps a
//! [`PromiseBuffer`] of past values, governed by a [`BufferPolicy`], and replays it to new
//! listeners before delivering live values. Promises retain their last value by default, streams
//! retain nothing.
//!
//! ## Cancellation
//!
//! Every promise and stream owns a [`CancelToken`]. Canceling it drops all listeners and any
//! retained values, and turns further sends into no-ops. Derived promises created by the
//! combinators ([`Promise::map`], [`Progress::and_then`], [`Promise::and`], ...) are *joined* with
//! their sources: canceling either side cancels the other. Joins are held by a [`Link`] that lives
//! inside the derived promise, so they vanish when it is dropped.
//!
//! ## Running producers
//!
//! [`Tasks`] runs producer closures on a caller-chosen [`Executor`], such as a [`Background`]
//! thread. Producer errors travel through the promise as an [`Outcome`], and a panicking producer
//! cancels its promise.
//!
//! # Usage
//!
//! Resolving a promise and transforming its value:
//!
//! ```
//! use tidings::deferred;
//!
//! let (deferred, promise) = deferred();
//! let doubled = promise.map(|n: &i32| n * 2);
//!
//! deferred.resolve(21).unwrap();
//!
//! // Promises retain their last value, so late consumers still see it.
//! assert_eq!(doubled.block(), Ok(42));
//! ```
//!
//! Running a producer on a background thread and streaming its results:
//!
//! ```
//! use tidings::{BufferPolicy, Channel, Tasks};
//!
//! let tasks = Tasks::background()?.policy(BufferPolicy::All);
//! let progress = tasks.progress(|channel: &Channel<u64>| {
//!     for i in 1..=10 {
//!         channel.send(i * i).unwrap();
//!     }
//! });
//!
//! let total = progress.fold(0, |acc: u64, square: &u64| acc + square);
//! assert_eq!(total.block(), Ok(385));
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Cancellation flows upstream through derived promises:
//!
//! ```
//! use tidings::channel;
//!
//! let (channel, progress) = channel::<i32>();
//! let evens = progress.filter(|n| n % 2 == 0);
//!
//! evens.cancel();
//! assert!(channel.is_canceled());
//! ```

mod buffer;
mod cancel;
mod combine;
mod core;
mod error;
mod outcome;
mod progress;
mod promise;
mod sync;
mod task;
#[cfg(test)]
mod test;

pub use buffer::{BufferPolicy, PromiseBuffer};
pub use cancel::{CancelToken, Link, ListenerId};
pub use error::Error;
pub use outcome::{Outcome, Variant};
pub use progress::{channel, Channel, Iter, Progress};
pub use promise::{deferred, Deferred, Promise, Wait};
pub use task::{Background, BackgroundBuilder, Executor, Inline, Job, Tasks};
