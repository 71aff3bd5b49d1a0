//! Pipeline stage implementations.
//!
//! This module contains the stages of a core, run back to front each cycle:
//! 1. **Completion:** Writes delayed load data into its chain of pending registers.
//! 2. **Writeback:** Commits the memory/writeback latch to the register file.
//! 3. **Memory:** Proposes, executes and commits one memory operation.
//! 4. **Issue:** Selects a thread, reads operands and suspends on pending ones.
//!
//! Register writes that may wake a thread are planned before the wakeup port
//! is arbitrated and committed after.

/// Completion writeback stage implementation.
pub mod completion;

/// Issue stage implementation.
pub mod issue;

/// Memory access stage implementation.
pub mod memory;

/// Writeback stage implementation.
pub mod writeback;

pub use completion::{completion_commit, completion_request};
pub use issue::issue_stage;
pub use memory::{MemoryAction, MemoryOutcome, StallCause, commit_memory, execute, propose_memory};
pub use writeback::{writeback_commit, writeback_request};

use super::PortWaker;
use crate::common::{REGISTER_WIDTH, RegAddr, SimError, SimResult, data};
use crate::core::Core;
use crate::core::regfile::RegValue;
use crate::core::threads::ThreadState;
use crate::kernel::ComponentId;

/// A register write checked during the acquire phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedWrite {
    /// Register written.
    pub addr: RegAddr,
    /// Value written.
    pub value: RegValue,
    /// Identity the register file checks against a pending load.
    pub writer: ComponentId,
    /// Identity arbitrating for the wakeup port.
    pub requester: ComponentId,
}

/// Checks a write and requests the wakeup port if it would wake a thread.
pub(crate) fn plan_write(
    core: &mut Core,
    addr: RegAddr,
    value: RegValue,
    writer: ComponentId,
    requester: ComponentId,
) -> SimResult<PlannedWrite> {
    let proposal = core.regs.propose_write(addr, value, writer)?;
    if proposal.wake.is_some() {
        let _ = core.wake_port.request(requester);
    }
    Ok(PlannedWrite {
        addr,
        value,
        writer,
        requester,
    })
}

/// Commits a planned write. Returns false if its wakeup lost arbitration.
pub(crate) fn commit_planned(core: &mut Core, plan: &PlannedWrite) -> SimResult<bool> {
    let mut waker = PortWaker::new(&core.wake_port, plan.requester);
    let done = core
        .regs
        .write(plan.addr, plan.value, plan.writer, &mut waker)?;
    let woken = waker.woken;
    if !done {
        core.stats.stalls_wake += 1;
        return Ok(false);
    }
    for thread in woken {
        let t = core.threads.get_mut(thread)?;
        if t.state == ThreadState::Suspended {
            t.state = ThreadState::Ready;
            core.stats.wakeups += 1;
        }
    }
    Ok(true)
}

/// Extracts a register value from line data, zero- or sign-extended.
pub(crate) fn extract(
    line: &[u8],
    offset: usize,
    size: usize,
    sign_extend: bool,
) -> SimResult<u64> {
    let bytes = line.get(offset..offset + size).ok_or_else(|| {
        SimError::invalid(format!(
            "{size}-byte access at offset {offset} outside a {}-byte line",
            line.len()
        ))
    })?;
    let raw = data::unserialize_register(bytes)?;
    if sign_extend && size < REGISTER_WIDTH {
        data::sign_extend(raw, size)
    } else {
        Ok(raw)
    }
}
