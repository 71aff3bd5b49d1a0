//! Memory Access (MEM) Stage.
//!
//! The stage runs in three steps so that a refused request leaves no trace:
//! 1. **Propose:** Inspect the issue/memory latch and decide what to do,
//!    without touching any state.
//! 2. **Execute:** Submit the request to the memory backend. This borrows
//!    only the backend and the client set, never the core.
//! 3. **Commit:** Apply the outcome. A `Failed` outcome changes nothing and
//!    the latch is offered again next cycle.
//!
//! Loads always fetch the whole line. A load to a line that already has a
//! read in flight from this core joins that read's chain instead of sending
//! another one. A store to a line with loads in flight or completions queued
//! waits, so that its own snoop can never patch data an older load is owed.

use tracing::{debug, trace};

use super::extract;
use crate::common::{
    ClientId, MemAddr, REGISTER_WIDTH, RegAddr, SimError, SimResult, ThreadId, WriteTag, data,
};
use crate::core::Core;
use crate::core::pipeline::StageResult;
use crate::core::pipeline::latches::{IssueMemEntry, WritebackEntry};
use crate::core::regfile::{PendingLoad, RegState, RegValue};
use crate::memory::{ClientSet, MemResult, Memory, Payload};

/// Why the memory stage is holding its latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallCause {
    /// The memory/writeback latch is still occupied.
    Writeback,
    /// A store waits for older loads to the same line.
    Ordering,
}

/// What the memory stage will do this cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryAction {
    /// The latch is empty.
    Idle,
    /// Hold the latch.
    Stall(StallCause),
    /// Move a computed value to the writeback latch.
    PassThrough,
    /// The load address is outside memory; clear the register.
    InvalidAddress,
    /// Join the chain of registers waiting on a line already being read.
    Chain {
        /// Current head of the chain.
        head: RegAddr,
    },
    /// Read a whole line.
    Read {
        /// Line address.
        line: MemAddr,
        /// Line size.
        size: usize,
    },
    /// Write a store.
    Write {
        /// Start address.
        addr: MemAddr,
        /// Serialized value.
        data: Payload,
        /// Tag identifying the storing thread.
        tag: WriteTag,
    },
}

/// Outcome of executing a [`MemoryAction`].
///
/// Reads carry their line on `Ready`; every other action is `Ready(None)`
/// once done.
pub type MemoryOutcome = MemResult<Option<Payload>>;

fn check_access(addr: MemAddr, size: usize, line_size: usize) -> SimResult<()> {
    if size == 0 || size > REGISTER_WIDTH {
        return Err(SimError::invalid(format!(
            "{size}-byte memory operation at {addr} does not fit a register"
        )));
    }
    if addr.line_offset(line_size) + size > line_size {
        return Err(SimError::invalid(format!(
            "{size}-byte memory operation at {addr} crosses a {line_size}-byte line"
        )));
    }
    Ok(())
}

/// Decides this cycle's action without side effects.
pub fn propose_memory(core: &Core, memory: &dyn Memory) -> SimResult<MemoryAction> {
    let Some(entry) = &core.issue_mem else {
        return Ok(MemoryAction::Idle);
    };
    let line_size = core.line_size;
    let action = match entry {
        IssueMemEntry::Value { .. } => {
            if core.mem_wb.is_some() {
                MemoryAction::Stall(StallCause::Writeback)
            } else {
                MemoryAction::PassThrough
            }
        }
        IssueMemEntry::Load { addr, size, .. } => {
            check_access(*addr, *size, line_size)?;
            let line = addr.line(line_size);
            if !memory.check_address(*addr, *size) {
                MemoryAction::InvalidAddress
            } else if let Some(&head) = core.pending_lines.get(&line) {
                MemoryAction::Chain { head }
            } else if core.mem_wb.is_some() {
                MemoryAction::Stall(StallCause::Writeback)
            } else {
                MemoryAction::Read {
                    line,
                    size: line_size,
                }
            }
        }
        IssueMemEntry::Store {
            thread,
            value,
            addr,
            size,
        } => {
            check_access(*addr, *size, line_size)?;
            let line = addr.line(line_size);
            if core.pending_lines.contains_key(&line)
                || core.completions.iter().any(|c| c.line == line)
            {
                MemoryAction::Stall(StallCause::Ordering)
            } else {
                MemoryAction::Write {
                    addr: *addr,
                    data: Payload::new(data::serialize_register(*value, *size)?),
                    tag: WriteTag(thread.0 as u64),
                }
            }
        }
    };
    Ok(action)
}

/// Submits the action's request, if any, to memory.
///
/// # Arguments
///
/// * `action` - Action returned by [`propose_memory`] this cycle
/// * `client` - The core's memory client id
/// * `memory` - The shared memory backend
/// * `clients` - Every memory client, for snoops
pub fn execute(
    action: &MemoryAction,
    client: ClientId,
    memory: &mut dyn Memory,
    clients: &mut dyn ClientSet,
) -> SimResult<MemoryOutcome> {
    let outcome = match action {
        MemoryAction::Read { line, size } => match memory.read(client, *line, *size)? {
            MemResult::Ready(data) => MemResult::Ready(Some(data)),
            MemResult::Delayed => MemResult::Delayed,
            MemResult::Failed => MemResult::Failed,
        },
        MemoryAction::Write { addr, data, tag } => {
            match memory.write(client, *addr, data.clone(), *tag, clients)? {
                MemResult::Ready(()) => MemResult::Ready(None),
                MemResult::Delayed => MemResult::Delayed,
                MemResult::Failed => MemResult::Failed,
            }
        }
        MemoryAction::Idle
        | MemoryAction::Stall(_)
        | MemoryAction::PassThrough
        | MemoryAction::InvalidAddress
        | MemoryAction::Chain { .. } => MemResult::Ready(None),
    };
    Ok(outcome)
}

/// Applies the outcome of this cycle's action.
pub fn commit_memory(
    core: &mut Core,
    action: MemoryAction,
    outcome: MemoryOutcome,
) -> SimResult<StageResult> {
    if outcome.is_failed() {
        core.stats.stalls_mem += 1;
        return Ok(StageResult::Stall);
    }
    let result = match action {
        MemoryAction::Idle => StageResult::Idle,
        MemoryAction::Stall(cause) => {
            match cause {
                StallCause::Writeback => core.stats.stalls_writeback += 1,
                StallCause::Ordering => core.stats.stalls_ordering += 1,
            }
            StageResult::Stall
        }
        MemoryAction::PassThrough => {
            if let Some(IssueMemEntry::Value { thread, rd, value }) = core.issue_mem.take() {
                core.mem_wb = Some(WritebackEntry { thread, rd, value });
            }
            StageResult::Progress
        }
        MemoryAction::InvalidAddress => {
            let (thread, rd, addr) = take_load(core)?;
            core.regs.clear(rd, 1, RegState::Empty)?;
            core.stats.loads += 1;
            core.stats.loads_invalid += 1;
            debug!(core = %core.name, %addr, %rd, "load from invalid address");
            core.retire(thread)?;
            StageResult::Progress
        }
        MemoryAction::Chain { head } => {
            make_pending(core, Some(head))?;
            core.stats.loads_chained += 1;
            StageResult::Progress
        }
        MemoryAction::Read { .. } => match outcome {
            MemResult::Ready(Some(data)) => {
                let Some(IssueMemEntry::Load {
                    thread,
                    rd,
                    addr,
                    size,
                    sign_extend,
                }) = core.issue_mem.take()
                else {
                    return Err(SimError::invalid("read committed without a load latched"));
                };
                let value = extract(&data, addr.line_offset(core.line_size), size, sign_extend)?;
                core.mem_wb = Some(WritebackEntry { thread, rd, value });
                core.stats.loads += 1;
                core.stats.loads_immediate += 1;
                trace!(core = %core.name, %addr, value, "load hit");
                StageResult::Progress
            }
            _ => {
                make_pending(core, None)?;
                core.stats.loads_delayed += 1;
                StageResult::Progress
            }
        },
        MemoryAction::Write { addr, .. } => {
            let Some(IssueMemEntry::Store { thread, .. }) = core.issue_mem.take() else {
                return Err(SimError::invalid("write committed without a store latched"));
            };
            core.stats.stores += 1;
            if outcome.is_delayed() {
                core.threads.get_mut(thread)?.outstanding_stores += 1;
            }
            debug!(core = %core.name, %addr, %thread, "store accepted");
            core.retire(thread)?;
            StageResult::Progress
        }
    };
    Ok(result)
}

fn take_load(core: &mut Core) -> SimResult<(ThreadId, RegAddr, MemAddr)> {
    match core.issue_mem.take() {
        Some(IssueMemEntry::Load {
            thread, rd, addr, ..
        }) => Ok((thread, rd, addr)),
        other => {
            core.issue_mem = other;
            Err(SimError::invalid("load action without a load latched"))
        }
    }
}

/// Makes the latched load's register pending, chained to `next`, and
/// retires the load. The line becomes the head of its chain.
fn make_pending(core: &mut Core, next: Option<RegAddr>) -> SimResult<()> {
    let Some(IssueMemEntry::Load {
        thread,
        rd,
        addr,
        size,
        sign_extend,
    }) = core.issue_mem.take()
    else {
        return Err(SimError::invalid("load action without a load latched"));
    };
    let load = PendingLoad {
        writer: core.ids.memory,
        offset: addr.line_offset(core.line_size),
        size,
        sign_extend,
        next,
    };
    let write = core
        .regs
        .propose_write(rd, RegValue::Pending(load), core.ids.memory)?;
    core.regs.commit_write(write)?;
    let _ = core.pending_lines.insert(addr.line(core.line_size), rd);
    core.threads.get_mut(thread)?.outstanding_loads += 1;
    core.stats.loads += 1;
    trace!(core = %core.name, %addr, %rd, ?next, "load pending");
    core.retire(thread)
}
