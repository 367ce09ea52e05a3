//! Replay buffers.
//!
//! A [`PromiseBuffer`] decides which past values a listener attaching late to a [`Promise`] or
//! [`Progress`] gets to see. The strategy is chosen by the producer through a [`BufferPolicy`].
//!
//! [`Promise`]: crate::Promise
//! [`Progress`]: crate::Progress

use std::collections::{vec_deque, VecDeque};

use crate::Error;

/// Retention strategy of a [`PromiseBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferPolicy {
    /// Retain nothing. Late listeners only see values sent after they attached.
    None,
    /// Retain the most recent value.
    Last,
    /// Retain the `n` most recent values, evicting the oldest on overflow.
    ///
    /// A capacity of 0 behaves exactly like [`BufferPolicy::None`].
    Ring(usize),
    /// Retain up to `n` values. Adding more fails with [`Error::CapacityExceeded`].
    Fixed(usize),
    /// Retain every value. The memory cost grows with the number of values sent.
    All,
}

impl BufferPolicy {
    /// Returns the number of values this policy retains, or [`None`] if it is unbounded.
    pub fn capacity(self) -> Option<usize> {
        match self {
            BufferPolicy::None => Some(0),
            BufferPolicy::Last => Some(1),
            BufferPolicy::Ring(n) | BufferPolicy::Fixed(n) => Some(n),
            BufferPolicy::All => None,
        }
    }
}

/// An ordered buffer of past values governed by a [`BufferPolicy`].
#[derive(Debug, Clone)]
pub struct PromiseBuffer<T> {
    policy: BufferPolicy,
    items: VecDeque<T>,
}

impl<T> PromiseBuffer<T> {
    /// Creates an empty buffer with the given policy.
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            policy,
            items: VecDeque::new(),
        }
    }

    #[inline]
    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    /// Adds an item according to the buffer's policy.
    ///
    /// Depending on the policy, this may discard `item`, evict the oldest retained item, or (for
    /// [`BufferPolicy::Fixed`]) reject `item` with [`Error::CapacityExceeded`], leaving the buffer
    /// unchanged.
    pub fn add(&mut self, item: T) -> Result<(), Error> {
        match self.policy {
            BufferPolicy::None | BufferPolicy::Ring(0) => {}
            BufferPolicy::Last => {
                self.items.clear();
                self.items.push_back(item);
            }
            BufferPolicy::Ring(n) => {
                if self.items.len() == n {
                    self.items.pop_front();
                }
                self.items.push_back(item);
            }
            BufferPolicy::Fixed(n) => {
                if self.items.len() >= n {
                    return Err(Error::CapacityExceeded { capacity: n });
                }
                self.items.push_back(item);
            }
            BufferPolicy::All => self.items.push_back(item),
        }
        Ok(())
    }

    /// Checks whether [`PromiseBuffer::add`] would accept another item.
    pub fn check_capacity(&self) -> Result<(), Error> {
        match self.policy {
            BufferPolicy::Fixed(n) if self.items.len() >= n => {
                Err(Error::CapacityExceeded { capacity: n })
            }
            _ => Ok(()),
        }
    }

    /// Iterates over the retained items, oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    /// Copies the retained items into a [`Vec`], oldest first.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Discards every retained item. The policy stays the same.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<'a, T> IntoIterator for &'a PromiseBuffer<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
