//! Fixed-depth shift register.
//!
//! Models a pipelined hardware unit: an item pushed at cycle `t` becomes
//! visible at cycle `t + depth`. Items leave in order; if the head cannot be
//! consumed, everything behind it waits.

use std::collections::VecDeque;

use super::Cycle;

/// A bounded in-order pipeline with a fixed latency.
#[derive(Debug, Clone)]
pub struct DelayLine<T> {
    depth: u64,
    capacity: usize,
    items: VecDeque<(Cycle, T)>,
}

impl<T> DelayLine<T> {
    /// Creates a delay line of the given depth holding at most `capacity` items.
    pub fn new(depth: u64, capacity: usize) -> Self {
        Self {
            depth,
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Latency of the line in cycles.
    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Returns true if another item can enter this cycle.
    pub fn has_space(&self) -> bool {
        self.items.len() < self.capacity
    }

    /// Pushes an item at cycle `now` with the line's own latency.
    ///
    /// Returns the item back if the line is full.
    pub fn push(&mut self, now: Cycle, item: T) -> Result<(), T> {
        self.push_with_delay(now, self.depth, item)
    }

    /// Pushes an item that becomes ready after `delay` cycles instead of the line depth.
    ///
    /// Items still leave in order, so a short delay behind a long one waits.
    pub fn push_with_delay(&mut self, now: Cycle, delay: u64, item: T) -> Result<(), T> {
        if !self.has_space() {
            return Err(item);
        }
        self.items.push_back((now + delay, item));
        Ok(())
    }

    /// Returns the head item if it is ready at `now`.
    pub fn peek_ready(&self, now: Cycle) -> Option<&T> {
        match self.items.front() {
            Some((ready, item)) if *ready <= now => Some(item),
            _ => None,
        }
    }

    /// Mutable access to the ready head item.
    pub fn peek_ready_mut(&mut self, now: Cycle) -> Option<&mut T> {
        match self.items.front_mut() {
            Some((ready, item)) if *ready <= now => Some(item),
            _ => None,
        }
    }

    /// Removes and returns the head item if it is ready at `now`.
    pub fn pop_ready(&mut self, now: Cycle) -> Option<T> {
        if self.peek_ready(now).is_some() {
            self.items.pop_front().map(|(_, item)| item)
        } else {
            None
        }
    }

    /// Number of items in flight.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over in-flight items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }
}
