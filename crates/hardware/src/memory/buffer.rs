//! Bounded FIFO request buffer.
//!
//! Models the input queue in front of a memory port: a request is either
//! accepted or rejected outright, never partially queued. A capacity of
//! [`INFINITE`] never rejects.

use std::collections::VecDeque;

use crate::common::{INFINITE, SimError, SimResult};

/// A FIFO that refuses new entries once `capacity` entries are queued.
#[derive(Debug, Clone)]
pub struct RequestBuffer<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> RequestBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum queued entries, or `INFINITE`.
    ///
    /// # Returns
    ///
    /// An error if `capacity` is zero.
    pub fn new(capacity: usize) -> SimResult<Self> {
        if capacity == 0 {
            return Err(SimError::invalid("request buffer needs at least one entry"));
        }
        Ok(Self {
            capacity,
            entries: VecDeque::new(),
        })
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if a push would be rejected.
    pub fn is_full(&self) -> bool {
        self.capacity != INFINITE && self.entries.len() >= self.capacity
    }

    /// Appends an entry, handing it back if the buffer is full.
    pub fn push(&mut self, entry: T) -> Result<(), T> {
        if self.is_full() {
            return Err(entry);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Oldest entry.
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Mutable access to the oldest entry.
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.entries.front_mut()
    }

    /// Removes the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over queued entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}
