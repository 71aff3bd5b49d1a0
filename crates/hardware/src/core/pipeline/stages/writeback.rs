//! Writeback (WB) Stage.
//!
//! Commits the memory/writeback latch to the register file and retires the
//! micro-op that produced it.

use super::{PlannedWrite, commit_planned, plan_write};
use crate::common::{SimError, SimResult};
use crate::core::Core;
use crate::core::pipeline::StageResult;
use crate::core::regfile::RegValue;

/// Plans the write of the latched value.
pub fn writeback_request(core: &mut Core) -> SimResult<Option<PlannedWrite>> {
    let Some(entry) = core.mem_wb else {
        return Ok(None);
    };
    let id = core.ids.writeback;
    plan_write(core, entry.rd, RegValue::Full(entry.value), id, id).map(Some)
}

/// Commits the planned write, frees the latch and retires the micro-op.
///
/// # Arguments
///
/// * `core` - The core whose latch is written back
/// * `plan` - Write returned by [`writeback_request`] this cycle
pub fn writeback_commit(core: &mut Core, plan: &PlannedWrite) -> SimResult<StageResult> {
    if !commit_planned(core, plan)? {
        return Ok(StageResult::Stall);
    }
    let entry = core
        .mem_wb
        .take()
        .ok_or_else(|| SimError::invalid("writeback commit with an empty latch"))?;
    core.retire(entry.thread)?;
    Ok(StageResult::Progress)
}
