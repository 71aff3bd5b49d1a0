//! Issue stage.
//!
//! Picks the next ready thread round robin and reads its operands. A thread
//! whose source operand (or destination, for a write-after-write) is still
//! waiting on a load is suspended on that register: issue writes `Waiting`
//! into the slot, and the write that later fills it wakes the thread, which
//! then issues the same micro-op again.

use tracing::trace;

use crate::common::{RegAddr, SimError, SimResult, ThreadId};
use crate::core::Core;
use crate::core::pipeline::latches::IssueMemEntry;
use crate::core::pipeline::StageResult;
use crate::core::regfile::{RegState, RegValue};
use crate::core::threads::ThreadState;
use crate::core::workload::MicroOp;

enum Operand {
    Value(u64),
    Blocked(StageResult),
}

/// Suspends `thread` on `reg` by marking the slot as waited on.
///
/// Only called on a slot that still has a load in flight, so the write never
/// needs a wakeup and never touches the wakeup port.
fn suspend(core: &mut Core, thread: ThreadId, reg: RegAddr) -> SimResult<StageResult> {
    let write = core
        .regs
        .propose_write(reg, RegValue::Waiting(thread), core.ids.issue)?;
    if write.wake.is_some() {
        return Err(SimError::RegisterProtocol {
            addr: reg.0,
            reason: format!("{thread} suspending on a register that is already full"),
        });
    }
    core.regs.commit_write(write)?;
    core.threads.get_mut(thread)?.state = ThreadState::Suspended;
    core.stats.suspensions += 1;
    trace!(core = %core.name, %thread, %reg, "thread suspended");
    Ok(StageResult::Progress)
}

fn operand(core: &mut Core, thread: ThreadId, reg: RegAddr, pc: usize) -> SimResult<Operand> {
    match core.regs.read(reg)? {
        RegState::Full(v) => Ok(Operand::Value(v)),
        RegState::Empty => Err(SimError::IllegalInstruction {
            pc,
            reason: format!("{thread} reads empty register {reg}"),
        }),
        RegState::Pending(_) | RegState::Waiting { .. } => {
            Ok(Operand::Blocked(suspend(core, thread, reg)?))
        }
    }
}

/// Returns the blocked result if `rd` still has a load in flight.
fn destination(core: &mut Core, thread: ThreadId, rd: RegAddr) -> SimResult<Option<StageResult>> {
    if core.regs.read(rd)?.is_pending() {
        suspend(core, thread, rd).map(Some)
    } else {
        Ok(None)
    }
}

/// Executes the issue stage.
///
/// Halts retire here; every other micro-op moves into the issue/memory latch
/// and its thread stays in the pipeline until the op retires.
///
/// # Arguments
///
/// * `core` - The core to issue from
pub fn issue_stage(core: &mut Core) -> SimResult<StageResult> {
    if core.issue_mem.is_some() {
        return Ok(StageResult::Stall);
    }
    let Some(tid) = core.threads.pick() else {
        return Ok(StageResult::Idle);
    };
    let window = core.threads.regs_per_thread();
    let thread = core.threads.get(tid)?;
    let pc = thread.pc;
    let op = thread.current_op();

    let entry = match op {
        MicroOp::Halt => {
            let thread = core.threads.get_mut(tid)?;
            thread.state = ThreadState::Halted;
            core.stats.ops_retired += 1;
            trace!(core = %core.name, %tid, pc, "thread halted");
            return Ok(StageResult::Progress);
        }
        MicroOp::Load {
            rd,
            addr,
            size,
            sign_extend,
        } => {
            let rd = thread.reg(rd, window)?;
            if let Some(blocked) = destination(core, tid, rd)? {
                return Ok(blocked);
            }
            IssueMemEntry::Load {
                thread: tid,
                rd,
                addr,
                size,
                sign_extend,
            }
        }
        MicroOp::Store { rs, addr, size } => {
            let rs = thread.reg(rs, window)?;
            let value = match operand(core, tid, rs, pc)? {
                Operand::Value(v) => v,
                Operand::Blocked(result) => return Ok(result),
            };
            IssueMemEntry::Store {
                thread: tid,
                value,
                addr,
                size,
            }
        }
        MicroOp::AddImm { rd, rs, imm } => {
            let (rd, rs) = (thread.reg(rd, window)?, thread.reg(rs, window)?);
            let value = match operand(core, tid, rs, pc)? {
                Operand::Value(v) => v,
                Operand::Blocked(result) => return Ok(result),
            };
            if let Some(blocked) = destination(core, tid, rd)? {
                return Ok(blocked);
            }
            IssueMemEntry::Value {
                thread: tid,
                rd,
                value: value.wrapping_add(imm as u64),
            }
        }
    };

    trace!(core = %core.name, %tid, pc, %op, "issue");
    core.issue_mem = Some(entry);
    let thread = core.threads.get_mut(tid)?;
    thread.pc += 1;
    thread.in_pipeline = true;
    Ok(StageResult::Progress)
}
