//! Core pipeline.
//!
//! Each cycle a core runs its stages back to front, so a stage sees the
//! latch behind it as the previous cycle left it:
//! 1. **Completion:** Fills one register of a completed line read.
//! 2. **Writeback:** Writes the memory/writeback latch into the register file.
//! 3. **Memory:** Turns the issue/memory latch into a memory request.
//! 4. **Issue:** Picks a ready thread and reads its operands.
//!
//! Completion and writeback share the thread wakeup port with issue; the
//! port is arbitrated once per cycle in that priority order.

/// Pipeline latch structures.
pub mod latches;

/// Stage implementations.
pub mod stages;

use crate::common::ThreadId;
use crate::kernel::{ArbitratedPort, ComponentId};

use super::regfile::ThreadWaker;

/// Result of one stage for one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageResult {
    /// Nothing to do.
    Idle,
    /// Work was done.
    Progress,
    /// Work is waiting on a resource; nothing changed.
    Stall,
}

impl StageResult {
    /// Returns true for `Progress`.
    pub const fn progressed(self) -> bool {
        matches!(self, Self::Progress)
    }
}

/// Wakes threads through the arbitrated wakeup port.
///
/// A wakeup only succeeds if `who` won this cycle's arbitration; woken
/// threads are collected for the core to mark ready.
#[derive(Debug)]
pub struct PortWaker<'a> {
    /// The core's wakeup port.
    pub port: &'a ArbitratedPort,
    /// Component performing the register write.
    pub who: ComponentId,
    /// Threads woken so far.
    pub woken: Vec<ThreadId>,
}

impl<'a> PortWaker<'a> {
    /// Creates a waker for `who`.
    pub const fn new(port: &'a ArbitratedPort, who: ComponentId) -> Self {
        Self {
            port,
            who,
            woken: Vec::new(),
        }
    }
}

impl ThreadWaker for PortWaker<'_> {
    fn wake(&mut self, thread: ThreadId) -> bool {
        if self.port.is_granted(self.who) {
            self.woken.push(thread);
            true
        } else {
            false
        }
    }
}
