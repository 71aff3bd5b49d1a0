//! Hardware threads and families.
//!
//! A core runs one family at a time: a group of threads spawned together,
//! each with its own program and its own window of the register file. The
//! family is torn down once every thread has halted and drained its memory
//! traffic.

use std::fmt;

use super::workload::{MicroOp, Program};
use crate::common::{RegAddr, SimError, SimResult, ThreadId};

/// Scheduling state of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// May issue.
    Ready,
    /// Waiting on a pending register.
    Suspended,
    /// Executed `Halt`.
    Halted,
}

/// One hardware thread.
#[derive(Clone, Debug)]
pub struct Thread {
    /// Family this thread belongs to.
    pub family: u64,
    /// Micro-ops to run.
    pub program: Program,
    /// Index of the next micro-op.
    pub pc: usize,
    /// Scheduling state.
    pub state: ThreadState,
    /// A micro-op of this thread is between issue and retirement.
    pub in_pipeline: bool,
    /// Loads whose register has not been completed yet.
    pub outstanding_loads: usize,
    /// Stores not yet acknowledged by memory.
    pub outstanding_stores: usize,
    /// First register of the thread's window.
    pub reg_base: usize,
}

impl Thread {
    /// Creates a ready thread at the start of `program`.
    pub const fn new(family: u64, program: Program, reg_base: usize) -> Self {
        Self {
            family,
            program,
            pc: 0,
            state: ThreadState::Ready,
            in_pipeline: false,
            outstanding_loads: 0,
            outstanding_stores: 0,
            reg_base,
        }
    }

    /// Micro-op at the current pc. Running off the end behaves like `Halt`.
    pub fn current_op(&self) -> MicroOp {
        self.program.get(self.pc).unwrap_or(MicroOp::Halt)
    }

    /// Returns true if the thread may be picked by issue.
    pub fn can_issue(&self) -> bool {
        self.state == ThreadState::Ready && !self.in_pipeline
    }

    /// Returns true once the thread halted and nothing of it is in flight.
    pub const fn is_drained(&self) -> bool {
        matches!(self.state, ThreadState::Halted)
            && !self.in_pipeline
            && self.outstanding_loads == 0
            && self.outstanding_stores == 0
    }

    /// Translates a window-relative register, rejecting indices outside the window.
    pub fn reg(&self, reg: usize, regs_per_thread: usize) -> SimResult<RegAddr> {
        if reg >= regs_per_thread {
            return Err(SimError::IllegalInstruction {
                pc: self.pc,
                reason: format!(
                    "register r{reg} outside the {regs_per_thread}-register window"
                ),
            });
        }
        Ok(RegAddr(self.reg_base + reg))
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} pc={} loads={} stores={}{}",
            self.state,
            self.pc,
            self.outstanding_loads,
            self.outstanding_stores,
            if self.in_pipeline { " in-pipeline" } else { "" }
        )
    }
}

/// The thread slots of one core.
#[derive(Clone, Debug)]
pub struct ThreadTable {
    slots: usize,
    regs_per_thread: usize,
    threads: Vec<Thread>,
    families: u64,
    next_issue: usize,
}

impl ThreadTable {
    /// Creates an empty table with `slots` thread slots.
    pub const fn new(slots: usize, regs_per_thread: usize) -> Self {
        Self {
            slots,
            regs_per_thread,
            threads: Vec::new(),
            families: 0,
            next_issue: 0,
        }
    }

    /// Registers per thread window.
    pub const fn regs_per_thread(&self) -> usize {
        self.regs_per_thread
    }

    /// Starts a family with one thread per program.
    pub fn spawn(&mut self, programs: Vec<Program>) -> SimResult<u64> {
        if !self.threads.is_empty() {
            return Err(SimError::invalid("a family is already running on this core"));
        }
        if programs.len() > self.slots {
            return Err(SimError::invalid(format!(
                "family of {} threads does not fit {} thread slots",
                programs.len(),
                self.slots
            )));
        }
        let family = self.families;
        self.families += 1;
        self.threads = programs
            .into_iter()
            .enumerate()
            .map(|(slot, program)| Thread::new(family, program, slot * self.regs_per_thread))
            .collect();
        self.next_issue = 0;
        Ok(family)
    }

    /// Ends the running family once all of its threads are drained.
    ///
    /// Returns the number of register slots the family occupied, or `None`
    /// if there is no family or it is still running.
    pub fn try_teardown(&mut self) -> Option<usize> {
        if self.threads.is_empty() || !self.threads.iter().all(Thread::is_drained) {
            return None;
        }
        let count = self.threads.len() * self.regs_per_thread;
        self.threads.clear();
        Some(count)
    }

    /// Thread by id.
    pub fn get(&self, id: ThreadId) -> SimResult<&Thread> {
        self.threads
            .get(id.0)
            .ok_or_else(|| SimError::invalid(format!("no thread {id}")))
    }

    /// Mutable thread by id.
    pub fn get_mut(&mut self, id: ThreadId) -> SimResult<&mut Thread> {
        self.threads
            .get_mut(id.0)
            .ok_or_else(|| SimError::invalid(format!("no thread {id}")))
    }

    /// Thread whose window contains `reg`.
    pub const fn owner(&self, reg: RegAddr) -> ThreadId {
        ThreadId(reg.0 / self.regs_per_thread)
    }

    /// Picks the next ready thread, round robin.
    pub fn pick(&mut self) -> Option<ThreadId> {
        let n = self.threads.len();
        let found = (0..n)
            .map(|i| (self.next_issue + i) % n)
            .find(|&i| self.threads[i].can_issue())?;
        self.next_issue = (found + 1) % n;
        Some(ThreadId(found))
    }

    /// Iterates over the threads of the running family.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }

    /// Returns true if no family is running.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Families spawned so far.
    pub const fn families_spawned(&self) -> u64 {
        self.families
    }
}
