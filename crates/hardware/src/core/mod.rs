//! Core processor implementation.
//!
//! A core multiplexes hardware threads over one short pipeline and is a
//! single client of the shared memory. It provides:
//! 1. **Register file:** The dataflow slots that let threads run ahead of loads.
//! 2. **Threads:** One family of threads at a time, each with a register window.
//! 3. **Pipeline:** Completion, writeback, memory and issue stages.
//! 4. **Memory client:** Queues completed line reads, counts acknowledged
//!    stores and patches queued data on snoops.

/// Instruction pipeline implementation (stages, latches, wakeup port).
pub mod pipeline;

/// Dataflow register file.
pub mod regfile;

/// Hardware threads and families.
pub mod threads;

/// Micro-ops and built-in workloads.
pub mod workload;

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use self::pipeline::StageResult;
use self::pipeline::latches::{CompletionEntry, IssueMemEntry, WritebackEntry};
use self::pipeline::stages::{self, MemoryAction, MemoryOutcome};
use self::regfile::{RegState, RegisterFile};
use self::threads::{ThreadState, ThreadTable};
use self::workload::Program;
use crate::common::{ClientId, MemAddr, RegAddr, SimResult, ThreadId, WriteTag};
use crate::config::Config;
use crate::kernel::{ArbitratedPort, ComponentId, ComponentRegistry};
use crate::memory::{Memory, MemoryClient};
use crate::stats::SimStats;

/// Registered identities of a core's components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreIds {
    /// Memory stage; owner of every pending load.
    pub memory: ComponentId,
    /// Completion writeback.
    pub completion: ComponentId,
    /// Writeback latch.
    pub writeback: ComponentId,
    /// Issue stage.
    pub issue: ComponentId,
}

/// One core of the grid.
#[derive(Debug)]
pub struct Core {
    pub(crate) name: String,
    pub(crate) client: ClientId,
    pub(crate) line_size: usize,
    pub(crate) ids: CoreIds,
    pub(crate) regs: RegisterFile,
    pub(crate) threads: ThreadTable,
    pub(crate) issue_mem: Option<IssueMemEntry>,
    pub(crate) mem_wb: Option<WritebackEntry>,
    /// Head of the chain of registers waiting on each line being read.
    pub(crate) pending_lines: HashMap<MemAddr, RegAddr>,
    pub(crate) completions: VecDeque<CompletionEntry>,
    pub(crate) completion_capacity: usize,
    pub(crate) wake_port: ArbitratedPort,
    pub(crate) stats: SimStats,
}

impl Core {
    /// Creates core `index`, registering its components.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the core in the grid
    /// * `config` - Simulator configuration
    /// * `registry` - Registry the core's components are named in
    /// * `client` - Id the memory backend assigned to this core
    pub fn new(
        index: usize,
        config: &Config,
        registry: &mut ComponentRegistry,
        client: ClientId,
    ) -> Self {
        let name = format!("core{index}");
        let ids = CoreIds {
            memory: registry.register(format!("{name}.memory")),
            completion: registry.register(format!("{name}.completion")),
            writeback: registry.register(format!("{name}.writeback")),
            issue: registry.register(format!("{name}.issue")),
        };
        let k = &config.core;
        Self {
            wake_port: ArbitratedPort::new(
                format!("{name}.wake"),
                vec![ids.completion, ids.writeback],
            ),
            name,
            client,
            line_size: config.memory.line_size,
            ids,
            regs: RegisterFile::new(k.threads_per_core * k.regs_per_thread),
            threads: ThreadTable::new(k.threads_per_core, k.regs_per_thread),
            issue_mem: None,
            mem_wb: None,
            pending_lines: HashMap::new(),
            completions: VecDeque::new(),
            completion_capacity: k.completion_buffer,
            stats: SimStats::default(),
        }
    }

    /// Core name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Memory client id.
    pub const fn client(&self) -> ClientId {
        self.client
    }

    /// Component ids.
    pub const fn ids(&self) -> CoreIds {
        self.ids
    }

    /// Register file.
    pub const fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    /// Thread table.
    pub const fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    /// Per-core counters.
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Starts a family with one thread per program.
    pub fn spawn_family(&mut self, programs: Vec<Program>) -> SimResult<()> {
        let threads = programs.len();
        let family = self.threads.spawn(programs)?;
        debug!(core = %self.name, family, threads, "family spawned");
        Ok(())
    }

    /// Returns true if the core has no threads and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.threads.is_empty()
            && self.issue_mem.is_none()
            && self.mem_wb.is_none()
            && self.completions.is_empty()
    }

    /// Starts a cycle by clearing last cycle's wakeup grant.
    pub fn begin_cycle(&mut self) {
        self.wake_port.end_cycle();
    }

    /// Runs completion and writeback: both plan, the wakeup port is
    /// arbitrated, then both commit.
    pub fn cycle_registers(&mut self) -> SimResult<bool> {
        let completion = stages::completion_request(self)?;
        let writeback = stages::writeback_request(self)?;
        let _ = self.wake_port.arbitrate();

        let mut progressed = false;
        if let Some((plan, next)) = completion {
            progressed |= stages::completion_commit(self, &plan, next)?.progressed();
        }
        if let Some(plan) = writeback {
            progressed |= stages::writeback_commit(self, &plan)?.progressed();
        }
        Ok(progressed)
    }

    /// Memory stage, acquire phase.
    pub fn propose_memory(&self, memory: &dyn Memory) -> SimResult<MemoryAction> {
        stages::propose_memory(self, memory)
    }

    /// Memory stage, commit phase.
    pub fn commit_memory(&mut self, action: MemoryAction, outcome: MemoryOutcome) -> SimResult<bool> {
        Ok(stages::commit_memory(self, action, outcome)?.progressed())
    }

    /// Issue stage, then family teardown.
    pub fn issue(&mut self) -> SimResult<bool> {
        let mut progressed = stages::issue_stage(self)? == StageResult::Progress;
        if let Some(count) = self.threads.try_teardown() {
            self.regs.clear(RegAddr(0), count, RegState::Empty)?;
            self.stats.families_completed += 1;
            debug!(core = %self.name, "family completed");
            progressed = true;
        }
        Ok(progressed)
    }

    /// Takes `thread`'s micro-op out of the pipeline.
    pub(crate) fn retire(&mut self, thread: ThreadId) -> SimResult<()> {
        self.threads.get_mut(thread)?.in_pipeline = false;
        self.stats.ops_retired += 1;
        Ok(())
    }

    /// One-line description of what the core is waiting on, if anything.
    pub fn dump_state(&self) -> Option<String> {
        if self.is_idle() {
            return None;
        }
        let count = |s: ThreadState| self.threads.iter().filter(|t| t.state == s).count();
        let pending = self.pending_lines.keys().map(ToString::to_string).collect::<Vec<_>>();
        Some(format!(
            "{}: {} ready, {} suspended, {} halted; lines pending [{}]; {} completions queued; \
             issue latch {}; writeback latch {}",
            self.name,
            count(ThreadState::Ready),
            count(ThreadState::Suspended),
            count(ThreadState::Halted),
            pending.join(" "),
            self.completions.len(),
            if self.issue_mem.is_some() { "full" } else { "empty" },
            if self.mem_wb.is_some() { "full" } else { "empty" },
        ))
    }
}

impl MemoryClient for Core {
    fn on_read_completed(&mut self, addr: MemAddr, data: &[u8]) -> bool {
        if self.completions.len() >= self.completion_capacity {
            return false;
        }
        let Some(head) = self.pending_lines.remove(&addr) else {
            warn!(core = %self.name, %addr, "read completion for a line with no pending load");
            return true;
        };
        self.completions.push_back(CompletionEntry {
            line: addr,
            data: data.to_vec(),
            next: Some(head),
        });
        true
    }

    fn on_write_completed(&mut self, tag: WriteTag) -> bool {
        let thread = ThreadId(tag.0 as usize);
        match self.threads.get_mut(thread) {
            Ok(t) if t.outstanding_stores > 0 => t.outstanding_stores -= 1,
            _ => warn!(core = %self.name, %thread, "unexpected write completion"),
        }
        true
    }

    fn accepts_snoop(&self, _addr: MemAddr, _len: usize) -> bool {
        true
    }

    fn on_snooped(&mut self, addr: MemAddr, data: &[u8]) {
        for entry in &mut self.completions {
            entry.patch(addr, data);
        }
    }
}
