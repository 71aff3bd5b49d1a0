//! Completion writeback stage.
//!
//! Line reads that completed in memory queue up in the core; each entry
//! carries the line data and the head of the chain of registers waiting on
//! that line. One register is completed per cycle, under the memory stage's
//! identity, since that is the component that made it pending.

use super::{PlannedWrite, commit_planned, extract, plan_write};
use crate::common::{RegAddr, SimError, SimResult};
use crate::core::Core;
use crate::core::pipeline::StageResult;
use crate::core::regfile::RegValue;

/// Plans the completion of the next register of the head entry.
///
/// Returns the write and the register that follows it in the chain.
pub fn completion_request(core: &mut Core) -> SimResult<Option<(PlannedWrite, Option<RegAddr>)>> {
    let Some(entry) = core.completions.front() else {
        return Ok(None);
    };
    let Some(rd) = entry.next else {
        let _ = core.completions.pop_front();
        return Ok(None);
    };
    let state = core.regs.read(rd)?;
    let Some(load) = state.pending_load().copied() else {
        return Err(SimError::RegisterProtocol {
            addr: rd.0,
            reason: format!("completion of line {} found no pending load ({state})", entry.line),
        });
    };
    let value = extract(&entry.data, load.offset, load.size, load.sign_extend)?;
    let (writer, requester) = (core.ids.memory, core.ids.completion);
    let plan = plan_write(core, rd, RegValue::Full(value), writer, requester)?;
    Ok(Some((plan, load.next)))
}

/// Commits a planned completion and advances the chain.
pub fn completion_commit(
    core: &mut Core,
    plan: &PlannedWrite,
    next: Option<RegAddr>,
) -> SimResult<StageResult> {
    if !commit_planned(core, plan)? {
        return Ok(StageResult::Stall);
    }
    let owner = core.threads.owner(plan.addr);
    let thread = core.threads.get_mut(owner)?;
    thread.outstanding_loads = thread.outstanding_loads.checked_sub(1).ok_or_else(|| {
        SimError::RegisterProtocol {
            addr: plan.addr.0,
            reason: format!("completion for {owner} which has no outstanding loads"),
        }
    })?;
    match next {
        Some(reg) => {
            if let Some(head) = core.completions.front_mut() {
                head.next = Some(reg);
            }
        }
        None => {
            let _ = core.completions.pop_front();
        }
    }
    Ok(StageResult::Progress)
}
