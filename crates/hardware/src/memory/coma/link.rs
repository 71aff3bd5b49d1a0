//! Ring links.
//!
//! A link is the input queue of one ring node. Two ways in:
//! 1. **Inject:** A node starting a new message; refused once the link holds `capacity` messages.
//! 2. **Forward:** A message already on the ring moving on; never refused.
//!
//! Anything pushed during a cycle becomes visible to the receiving node only
//! after `commit` at the end of that cycle.

use std::collections::VecDeque;

use super::message::Message;

/// Input queue of a ring node.
#[derive(Debug, Clone)]
pub struct Link {
    queue: VecDeque<Message>,
    staged: Vec<Message>,
    capacity: usize,
}

impl Link {
    /// Creates an empty link that accepts injections up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            staged: Vec::new(),
            capacity,
        }
    }

    /// Returns true if a new message may be injected this cycle.
    pub fn can_inject(&self) -> bool {
        self.queue.len() + self.staged.len() < self.capacity
    }

    /// Starts a new message on the ring.
    pub fn try_inject(&mut self, msg: Message) -> Result<(), Message> {
        if !self.can_inject() {
            return Err(msg);
        }
        self.staged.push(msg);
        Ok(())
    }

    /// Passes a message along.
    pub fn forward(&mut self, msg: Message) {
        self.staged.push(msg);
    }

    /// Takes the oldest visible message.
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Makes this cycle's pushes visible.
    pub fn commit(&mut self) {
        self.queue.extend(self.staged.drain(..));
    }

    /// Messages visible or staged.
    pub fn len(&self) -> usize {
        self.queue.len() + self.staged.len()
    }

    /// Returns true if nothing is on the link.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.staged.is_empty()
    }

    /// Iterates over every message on the link.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter().chain(self.staged.iter())
    }
}
