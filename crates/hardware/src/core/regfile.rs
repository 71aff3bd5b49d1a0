//! Dataflow register file.
//!
//! Each slot is a small state machine that lets threads run ahead of their
//! loads:
//! 1. **Empty:** No value; reading it is an illegal instruction.
//! 2. **Pending:** A load is in flight and will complete the slot.
//! 3. **Waiting:** Pending, and a suspended thread wants the value.
//! 4. **Full:** Holds a value.
//!
//! Writes come in two phases. `propose_write` checks the transition and
//! returns the change without touching the slot; `commit_write` applies it.
//! `write` combines both and only commits when the thread wakeup the
//! transition requires can be scheduled this cycle.

use std::fmt;

use crate::common::{RegAddr, SimError, SimResult, ThreadId};
use crate::kernel::ComponentId;

/// Bookkeeping for a load that will complete a register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingLoad {
    /// Component allowed to complete the register.
    pub writer: ComponentId,
    /// Byte offset of the loaded value within its line.
    pub offset: usize,
    /// Bytes loaded.
    pub size: usize,
    /// Sign-extend the loaded value.
    pub sign_extend: bool,
    /// Next register waiting on the same line.
    pub next: Option<RegAddr>,
}

/// Current state of a register slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegState {
    /// No value.
    #[default]
    Empty,
    /// A load is in flight.
    Pending(PendingLoad),
    /// A load is in flight and `thread` is suspended on it.
    Waiting {
        /// The load that will complete the slot.
        load: PendingLoad,
        /// Thread to wake on completion.
        thread: ThreadId,
    },
    /// Holds a value.
    Full(u64),
}

impl RegState {
    /// Returns true if a load will still complete this slot.
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_) | Self::Waiting { .. })
    }

    /// The in-flight load, if any.
    pub const fn pending_load(&self) -> Option<&PendingLoad> {
        match self {
            Self::Pending(load) | Self::Waiting { load, .. } => Some(load),
            Self::Empty | Self::Full(_) => None,
        }
    }
}

impl fmt::Display for RegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Pending(load) => write!(f, "pending({})", load.writer),
            Self::Waiting { thread, .. } => write!(f, "waiting({thread})"),
            Self::Full(v) => write!(f, "{v:#x}"),
        }
    }
}

/// Value carried by a register write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegValue {
    /// Never valid as a write; rejected.
    Empty,
    /// Start a load.
    Pending(PendingLoad),
    /// Suspend `ThreadId` until the slot is full.
    Waiting(ThreadId),
    /// A value.
    Full(u64),
}

/// A checked register transition, ready to commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Slot written.
    pub addr: RegAddr,
    /// New slot state, or `None` if the slot is left as is.
    pub new_state: Option<RegState>,
    /// Thread to wake as part of the write.
    pub wake: Option<ThreadId>,
}

/// Schedules thread wakeups.
#[cfg_attr(test, mockall::automock)]
pub trait ThreadWaker {
    /// Wakes `thread`. Returns false if the wakeup cannot happen this cycle.
    fn wake(&mut self, thread: ThreadId) -> bool;
}

/// The register slots of one core.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    slots: Vec<RegState>,
}

impl RegisterFile {
    /// Creates `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![RegState::Empty; size],
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the file has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn index(&self, addr: RegAddr) -> SimResult<usize> {
        if addr.0 < self.slots.len() {
            Ok(addr.0)
        } else {
            Err(SimError::invalid(format!(
                "register {addr} out of range ({} slots)",
                self.slots.len()
            )))
        }
    }

    /// Reads a slot.
    pub fn read(&self, addr: RegAddr) -> SimResult<RegState> {
        Ok(self.slots[self.index(addr)?])
    }

    /// Checks a write and returns the resulting change without applying it.
    ///
    /// # Arguments
    ///
    /// * `addr` - Slot to write.
    /// * `value` - Incoming value.
    /// * `writer` - Component performing the write; must own the pending load
    ///   when completing one.
    pub fn propose_write(
        &self,
        addr: RegAddr,
        value: RegValue,
        writer: ComponentId,
    ) -> SimResult<RegisterWrite> {
        let current = self.read(addr)?;
        let violation = |reason: &str| SimError::RegisterProtocol {
            addr: addr.0,
            reason: format!("{reason} (slot is {current})"),
        };
        let (new_state, wake) = match (value, current) {
            (RegValue::Empty, _) => return Err(violation("empty write")),

            (RegValue::Waiting(thread), RegState::Pending(load)) => {
                (Some(RegState::Waiting { load, thread }), None)
            }
            (RegValue::Waiting(thread), RegState::Full(_)) => (None, Some(thread)),
            (RegValue::Waiting(_), _) => {
                return Err(violation("waiting on a register with no pending load"));
            }

            (RegValue::Pending(_), RegState::Pending(_) | RegState::Waiting { .. }) => {
                return Err(violation("register already has a pending load"));
            }
            (RegValue::Pending(load), RegState::Empty | RegState::Full(_)) => {
                (Some(RegState::Pending(load)), None)
            }

            (RegValue::Full(v), RegState::Pending(load)) => {
                if load.writer != writer {
                    return Err(violation("invalid component overwriting pending register"));
                }
                (Some(RegState::Full(v)), None)
            }
            (RegValue::Full(v), RegState::Waiting { load, thread }) => {
                if load.writer != writer {
                    return Err(violation("invalid component overwriting pending register"));
                }
                (Some(RegState::Full(v)), Some(thread))
            }
            (RegValue::Full(v), RegState::Empty | RegState::Full(_)) => {
                (Some(RegState::Full(v)), None)
            }
        };
        Ok(RegisterWrite {
            addr,
            new_state,
            wake,
        })
    }

    /// Applies a proposed write.
    pub fn commit_write(&mut self, write: RegisterWrite) -> SimResult<()> {
        let i = self.index(write.addr)?;
        if let Some(state) = write.new_state {
            self.slots[i] = state;
        }
        Ok(())
    }

    /// Writes a slot, waking a suspended thread if the transition calls for it.
    ///
    /// Returns `Ok(false)`, with nothing changed, if the wakeup cannot be
    /// scheduled this cycle.
    pub fn write(
        &mut self,
        addr: RegAddr,
        value: RegValue,
        writer: ComponentId,
        waker: &mut dyn ThreadWaker,
    ) -> SimResult<bool> {
        let write = self.propose_write(addr, value, writer)?;
        if let Some(thread) = write.wake {
            if !waker.wake(thread) {
                return Ok(false);
            }
        }
        self.commit_write(write)?;
        Ok(true)
    }

    /// Sets `count` slots starting at `start` to `value`.
    pub fn clear(&mut self, start: RegAddr, count: usize, value: RegState) -> SimResult<()> {
        let end = start.0.checked_add(count).filter(|&e| e <= self.slots.len());
        let Some(end) = end else {
            return Err(SimError::invalid(format!(
                "clearing {count} registers from {start} exceeds {} slots",
                self.slots.len()
            )));
        };
        self.slots[start.0..end].fill(value);
        Ok(())
    }
}
