//! Victim buffer.
//!
//! A small fully associative buffer of lines that were evicted while still
//! holding tokens. An entry stays until the ring accepts its eviction message.
//! Meanwhile it still answers requests for its line, and a passing token
//! acquisition may take its tokens, which cancels the eviction.

use std::collections::VecDeque;

use crate::common::MemAddr;

/// An evicted line waiting to leave the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Victim {
    /// Line address.
    pub line: MemAddr,
    /// Tokens the line held.
    pub tokens: usize,
    /// Whether the priority token is among them.
    pub priority: bool,
    /// Data differs from the root's backing store.
    pub dirty: bool,
    /// Line contents.
    pub data: Vec<u8>,
}

/// Bounded set of victims, oldest first.
#[derive(Debug, Clone)]
pub struct VictimBuffer {
    entries: VecDeque<Victim>,
    capacity: usize,
}

impl VictimBuffer {
    /// Creates an empty buffer of `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns true if another victim fits.
    pub fn has_space(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Adds a victim, handing it back if the buffer is full.
    pub fn push(&mut self, victim: Victim) -> Result<(), Victim> {
        if !self.has_space() {
            return Err(victim);
        }
        self.entries.push_back(victim);
        Ok(())
    }

    /// Looks up the victim for `line`.
    pub fn find(&self, line: MemAddr) -> Option<&Victim> {
        self.entries.iter().find(|v| v.line == line)
    }

    /// Mutable lookup.
    pub fn find_mut(&mut self, line: MemAddr) -> Option<&mut Victim> {
        self.entries.iter_mut().find(|v| v.line == line)
    }

    /// Removes and returns the victim for `line`.
    pub fn take(&mut self, line: MemAddr) -> Option<Victim> {
        let pos = self.entries.iter().position(|v| v.line == line)?;
        self.entries.remove(pos)
    }

    /// Oldest victim, next to be sent as an eviction.
    pub fn front(&self) -> Option<&Victim> {
        self.entries.front()
    }

    /// Removes the oldest victim.
    pub fn pop_front(&mut self) -> Option<Victim> {
        self.entries.pop_front()
    }

    /// Number of victims.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no victim is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over victims, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Victim> {
        self.entries.iter()
    }
}
