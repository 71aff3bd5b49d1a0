//! Simulator: owns the cores and the memory backend side by side.
//!
//! Cores are the memory's clients, and core `i` is registered as client
//! `ClientId(i)`, so the core vector itself routes memory callbacks. Each
//! cycle:
//! 1. **Memory:** The backend advances and delivers completions that are due.
//! 2. **Cores:** Each core runs completion and writeback, then its memory
//!    stage (propose, execute against the backend, commit), then issue.
//! 3. **Liveness:** A run that makes no progress for the configured
//!    threshold while work remains fails with a deadlock report.

use tracing::{debug, info, warn};

use crate::common::{ClientId, MemAddr, SimError, SimResult};
use crate::config::{Config, MemoryKind};
use crate::core::Core;
use crate::core::pipeline::stages::execute;
use crate::core::workload::{self, Program};
use crate::kernel::{Activity, ComponentRegistry, Cycle};
use crate::memory::{ComaMemory, FlatMemory, Memory};
use crate::stats::SimStats;

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every core and the memory went idle.
    Idle,
    /// The cycle limit was reached with work remaining.
    CycleLimit,
}

/// Result of [`Simulator::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// Cycles simulated by this run.
    pub cycles: u64,
    /// Why the run stopped.
    pub reason: StopReason,
}

/// Top-level simulator.
#[derive(Debug)]
pub struct Simulator {
    config: Config,
    registry: ComponentRegistry,
    memory: Box<dyn Memory>,
    cores: Vec<Core>,
    now: Cycle,
    idle_cycles: u64,
}

impl Simulator {
    /// Builds the memory backend named by the configuration and the cores.
    pub fn new(config: Config) -> SimResult<Self> {
        config.validate()?;
        let memory: Box<dyn Memory> = match config.memory.kind {
            MemoryKind::Coma => Box::new(ComaMemory::new(&config.memory, &config.coma)?),
            MemoryKind::Simple | MemoryKind::Parallel | MemoryKind::Banked => {
                Box::new(FlatMemory::from_config(&config.memory)?)
            }
        };
        Self::with_memory(config, memory)
    }

    /// Builds the cores around an existing memory backend.
    pub fn with_memory(config: Config, mut memory: Box<dyn Memory>) -> SimResult<Self> {
        let mut registry = ComponentRegistry::new();
        let mut cores = Vec::with_capacity(config.core.cores);
        for i in 0..config.core.cores {
            let client = memory.register_client(&format!("core{i}"))?;
            if client != ClientId(i) {
                return Err(SimError::invalid(format!(
                    "memory assigned client {} to core{i}",
                    client.0
                )));
            }
            cores.push(Core::new(i, &config, &mut registry, client));
        }
        info!(
            memory = memory.name(),
            cores = cores.len(),
            components = registry.len(),
            "simulator built"
        );
        Ok(Self {
            config,
            registry,
            memory,
            cores,
            now: 0,
            idle_cycles: 0,
        })
    }

    /// Configuration the simulator was built from.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Component names.
    pub const fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// The memory backend.
    pub fn memory(&self) -> &dyn Memory {
        self.memory.as_ref()
    }

    /// Mutable memory backend, for loading images.
    pub fn memory_mut(&mut self) -> &mut dyn Memory {
        self.memory.as_mut()
    }

    /// The cores.
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// Current cycle.
    pub const fn now(&self) -> Cycle {
        self.now
    }

    /// Spawns the configured workload on every core.
    pub fn load_workload(&mut self) -> SimResult<()> {
        for i in 0..self.cores.len() {
            let programs = workload::generate(&self.config, i)?;
            if !programs.is_empty() {
                self.spawn(i, programs)?;
            }
        }
        Ok(())
    }

    /// Spawns a family on core `core`.
    pub fn spawn(&mut self, core: usize, programs: Vec<Program>) -> SimResult<()> {
        self.cores
            .get_mut(core)
            .ok_or_else(|| SimError::invalid(format!("no core {core}")))?
            .spawn_family(programs)
    }

    /// Reads memory contents without timing.
    pub fn peek(&self, addr: MemAddr, len: usize) -> SimResult<Vec<u8>> {
        self.memory.peek(addr, len)
    }

    /// Returns true if every core and the memory are idle.
    pub fn is_idle(&self) -> bool {
        self.memory.is_idle() && self.cores.iter().all(Core::is_idle)
    }

    /// Advances the whole grid by one clock cycle.
    pub fn tick(&mut self) -> SimResult<Activity> {
        let mut activity = self.memory.cycle(self.now, &mut self.cores)?;
        for i in 0..self.cores.len() {
            let core = &mut self.cores[i];
            core.begin_cycle();
            let mut progressed = core.cycle_registers()?;

            let action = self.cores[i].propose_memory(self.memory.as_ref())?;
            let client = self.cores[i].client();
            let outcome = execute(&action, client, self.memory.as_mut(), &mut self.cores)?;

            let core = &mut self.cores[i];
            progressed |= core.commit_memory(action, outcome)?;
            progressed |= core.issue()?;
            activity = activity.merge(Activity {
                progressed,
                busy: !core.is_idle(),
            });
        }
        self.now += 1;
        Ok(activity)
    }

    /// Runs until everything is idle or `max_cycles` have elapsed.
    pub fn run(&mut self, max_cycles: u64) -> SimResult<RunOutcome> {
        let start = self.now;
        while !self.is_idle() {
            if self.now - start >= max_cycles {
                debug!(cycle = self.now, "cycle limit reached");
                return Ok(RunOutcome {
                    cycles: self.now - start,
                    reason: StopReason::CycleLimit,
                });
            }
            let activity = self.tick()?;
            if activity.progressed || !activity.busy {
                self.idle_cycles = 0;
            } else {
                self.idle_cycles += 1;
                if self.idle_cycles >= self.config.general.deadlock_threshold {
                    return Err(self.deadlock());
                }
            }
        }
        info!(cycle = self.now, "simulation idle");
        Ok(RunOutcome {
            cycles: self.now - start,
            reason: StopReason::Idle,
        })
    }

    fn deadlock(&self) -> SimError {
        let mut components = self.memory.dump_state();
        components.extend(self.cores.iter().filter_map(Core::dump_state));
        warn!(cycle = self.now, idle = self.idle_cycles, "deadlock detected");
        for line in &components {
            warn!("  {line}");
        }
        SimError::Deadlock {
            cycle: self.now,
            idle_cycles: self.idle_cycles,
            components,
        }
    }

    /// Statistics of the whole grid: core counters summed, plus the memory's.
    pub fn stats(&self) -> SimStats {
        let mut stats = SimStats {
            cycles: self.now,
            ..SimStats::default()
        };
        for core in &self.cores {
            stats.accumulate(core.stats());
        }
        stats.memory = self.memory.stats();
        stats
    }
}
