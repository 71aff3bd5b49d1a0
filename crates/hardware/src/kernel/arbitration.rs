//! Fixed-priority arbitrated ports.
//!
//! A port models a shared hardware resource (a register-file write port, a
//! thread-activation port) that at most one requester may use per cycle. The
//! priority order is fixed when the port is built; requesters that lose simply
//! request again next cycle.

use super::registry::ComponentId;

/// A shared resource granted to one requester per cycle.
#[derive(Debug, Clone)]
pub struct ArbitratedPort {
    name: String,
    /// Requesters in priority order, highest first.
    priority: Vec<ComponentId>,
    /// Pending requests for the current cycle, indexed like `priority`.
    requested: Vec<bool>,
    granted: Option<ComponentId>,
}

impl ArbitratedPort {
    /// Creates a port with the given requesters, highest priority first.
    pub fn new(name: impl Into<String>, priority: Vec<ComponentId>) -> Self {
        let requested = vec![false; priority.len()];
        Self {
            name: name.into(),
            priority,
            requested,
            granted: None,
        }
    }

    /// Port name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire phase: registers a request from `who`.
    ///
    /// Returns false if `who` is not a known requester of this port.
    pub fn request(&mut self, who: ComponentId) -> bool {
        match self.priority.iter().position(|&p| p == who) {
            Some(i) => {
                self.requested[i] = true;
                true
            }
            None => false,
        }
    }

    /// Resolves this cycle's requests; the highest-priority requester wins.
    pub fn arbitrate(&mut self) -> Option<ComponentId> {
        self.granted = self
            .requested
            .iter()
            .position(|&r| r)
            .map(|i| self.priority[i]);
        self.requested.iter_mut().for_each(|r| *r = false);
        self.granted
    }

    /// Commit phase: whether `who` won this cycle's arbitration.
    pub fn is_granted(&self, who: ComponentId) -> bool {
        self.granted == Some(who)
    }

    /// Clears the grant at the end of the cycle.
    pub fn end_cycle(&mut self) {
        self.granted = None;
    }
}
