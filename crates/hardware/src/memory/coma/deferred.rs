//! Deferred request queue with admission control.
//!
//! Client requests that would race an in-flight transaction on the same line
//! wait here, in arrival order, until the line settles. Occupancy drives a
//! hysteresis flag: reaching the upper margin raises `buffer_priority`, which
//! makes the cache refuse brand-new client requests; it drops again once the
//! backlog drains to the lower margin.

use std::collections::VecDeque;

use crate::common::MemAddr;

/// Line-indexed FIFO of parked requests.
#[derive(Debug, Clone)]
pub struct DeferredQueue<T> {
    entries: VecDeque<(MemAddr, T)>,
    upper: usize,
    lower: usize,
    priority: bool,
}

impl<T> DeferredQueue<T> {
    /// Creates an empty queue with the given margins (`lower < upper`).
    pub fn new(upper: usize, lower: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            upper,
            lower,
            priority: false,
        }
    }

    fn update_priority(&mut self) {
        if self.entries.len() >= self.upper {
            self.priority = true;
        } else if self.entries.len() <= self.lower {
            self.priority = false;
        }
    }

    /// True while new client requests must be refused.
    pub const fn buffer_priority(&self) -> bool {
        self.priority
    }

    /// Parks a request for `line`.
    pub fn push(&mut self, line: MemAddr, item: T) {
        self.entries.push_back((line, item));
        self.update_priority();
    }

    /// Returns true if any request for `line` is parked.
    pub fn contains_line(&self, line: MemAddr) -> bool {
        self.entries.iter().any(|(l, _)| *l == line)
    }

    /// Removes every entry for servicing; hand the leftovers back with `restore`.
    pub fn take_all(&mut self) -> VecDeque<(MemAddr, T)> {
        std::mem::take(&mut self.entries)
    }

    /// Puts unserviced entries back at the front, keeping their order.
    pub fn restore(&mut self, mut kept: VecDeque<(MemAddr, T)>) {
        kept.append(&mut self.entries);
        self.entries = kept;
        self.update_priority();
    }

    /// Number of parked requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
