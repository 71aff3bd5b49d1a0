//! Configuration system for the microgrid simulator.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the simulator. It provides:
//! 1. **Defaults:** Baseline constants for memory timing, ring shape and core size.
//! 2. **Structures:** Hierarchical config for general, memory, COMA, core and workload.
//! 3. **Loading:** JSON parsing from strings or files, plus consistency validation.
//!
//! Every field has a default, so `Config::default()` and `{}` describe the same machine.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::common::{MAX_MEMORY_OPERATION_SIZE, SimError, SimResult};

/// Default configuration constants for the simulator.
mod defaults {
    /// Consecutive cycles without progress before a deadlock is declared.
    pub const DEADLOCK_THRESHOLD: u64 = 2_000;

    /// Upper bound on simulated cycles for one run.
    pub const MAX_CYCLES: u64 = 10_000_000;

    /// Size of the simulated shared memory (1 MiB).
    pub const MEMORY_SIZE: usize = 1024 * 1024;

    /// Cache line size in bytes.
    pub const LINE_SIZE: usize = 64;

    /// Fixed part of every memory access, in cycles.
    pub const BASE_LATENCY: u64 = 20;

    /// Additional cycles per line transferred.
    pub const LINE_LATENCY: u64 = 2;

    /// Request buffer entries per port or bank.
    pub const BUFFER_SIZE: usize = 16;

    /// Independent ports of the parallel memory.
    pub const PORTS: usize = 2;

    /// Banks of the banked memory.
    pub const BANKS: usize = 4;

    /// Caches on each sub-ring.
    pub const CACHES_PER_RING: usize = 2;

    /// Number of sub-rings (one directory each).
    pub const RINGS: usize = 2;

    /// Sets per COMA cache.
    pub const SETS: usize = 16;

    /// Ways per COMA cache set.
    pub const ASSOCIATIVITY: usize = 4;

    /// Merge-store buffer slots per cache.
    pub const MERGE_SLOTS: usize = 4;

    /// Victim buffer entries per cache.
    pub const VICTIM_ENTRIES: usize = 4;

    /// Depth of the cache lookup pipeline.
    pub const LOOKUP_LATENCY: u64 = 2;

    /// Messages a node may inject into a ring link before backpressure.
    pub const LINK_CAPACITY: usize = 4;

    /// Client requests queued at a cache.
    pub const REQUEST_BUFFER: usize = 8;

    /// Deferred-queue occupancy that raises buffer priority.
    pub const DEFERRED_HIGH: usize = 12;

    /// Deferred-queue occupancy that clears buffer priority.
    pub const DEFERRED_LOW: usize = 4;

    /// Cores in the grid.
    pub const CORES: usize = 2;

    /// Hardware threads per core.
    pub const THREADS_PER_CORE: usize = 4;

    /// Registers per thread.
    pub const REGS_PER_THREAD: usize = 16;

    /// Completed line reads a core can buffer.
    pub const COMPLETION_BUFFER: usize = 4;

    /// Micro-ops per generated thread program.
    pub const OPS_PER_THREAD: usize = 32;

    /// Byte distance between consecutive accesses of a stream workload.
    pub const STRIDE: u64 = 8;
}

/// Memory backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MemoryKind {
    /// One serial port; requests complete in arrival order.
    #[default]
    Simple,
    /// Several ports assigned round-robin to clients.
    Parallel,
    /// Banks selected by line address.
    Banked,
    /// Token-coherent ring of caches and directories.
    #[serde(alias = "COMA")]
    Coma,
}

/// Built-in workload generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkloadKind {
    /// Each thread streams loads, dependent adds and stores through its own region.
    #[default]
    Stream,
    /// All threads of all cores read-modify-write one shared line.
    Shared,
    /// Threads halt immediately.
    Idle,
}

/// Root configuration structure containing all simulator settings.
///
/// # Examples
///
/// ```
/// use mgsim_core::config::{Config, MemoryKind};
///
/// let config = Config::from_json_str(r#"{ "memory": { "kind": "Coma" } }"#).unwrap();
/// assert_eq!(config.memory.kind, MemoryKind::Coma);
/// assert_eq!(config.memory.line_size, 64);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// General simulation settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Memory backend configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// COMA ring configuration (used when `memory.kind` is `Coma`)
    #[serde(default)]
    pub coma: ComaConfig,
    /// Core and register file configuration
    #[serde(default)]
    pub core: CoreConfig,
    /// Built-in workload selection
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SimError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> SimResult<()> {
        let m = &self.memory;
        if !m.line_size.is_power_of_two() || m.line_size > MAX_MEMORY_OPERATION_SIZE {
            return Err(SimError::Config(format!(
                "line_size {} must be a power of two no larger than {MAX_MEMORY_OPERATION_SIZE}",
                m.line_size
            )));
        }
        if m.size < m.line_size {
            return Err(SimError::Config("memory smaller than one line".into()));
        }
        if m.buffer_size == Some(0) {
            return Err(SimError::Config("buffer_size must be non-zero".into()));
        }
        if m.ports == 0 || m.banks == 0 {
            return Err(SimError::Config("ports and banks must be non-zero".into()));
        }
        let c = &self.coma;
        if c.caches_per_ring == 0 || c.rings == 0 || c.sets == 0 || c.associativity == 0 {
            return Err(SimError::Config("COMA ring shape must be non-zero".into()));
        }
        if c.merge_slots == 0
            || c.victim_entries == 0
            || c.link_capacity < 2
            || c.request_buffer == 0
        {
            return Err(SimError::Config(
                "merge_slots, victim_entries and request_buffer must be non-zero, \
                 link_capacity at least 2"
                    .into(),
            ));
        }
        if c.deferred_low >= c.deferred_high {
            return Err(SimError::Config(format!(
                "deferred_low ({}) must be below deferred_high ({})",
                c.deferred_low, c.deferred_high
            )));
        }
        let k = &self.core;
        if k.cores == 0 || k.threads_per_core == 0 || k.regs_per_thread < 2 {
            return Err(SimError::Config(
                "need at least one core, one thread and two registers per thread".into(),
            ));
        }
        if k.completion_buffer == 0 {
            return Err(SimError::Config("completion_buffer must be non-zero".into()));
        }
        Ok(())
    }
}

/// General simulation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Cycles without progress (while work remains) before reporting a deadlock
    #[serde(default = "GeneralConfig::default_deadlock_threshold")]
    pub deadlock_threshold: u64,

    /// Hard limit on simulated cycles
    #[serde(default = "GeneralConfig::default_max_cycles")]
    pub max_cycles: u64,
}

impl GeneralConfig {
    fn default_deadlock_threshold() -> u64 {
        defaults::DEADLOCK_THRESHOLD
    }

    fn default_max_cycles() -> u64 {
        defaults::MAX_CYCLES
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            deadlock_threshold: defaults::DEADLOCK_THRESHOLD,
            max_cycles: defaults::MAX_CYCLES,
        }
    }
}

/// Memory backend and timing configuration.
///
/// A request started at cycle `t` completes at
/// `t + base_latency + line_latency * ceil(size / line_size)`.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Backend implementation
    #[serde(default)]
    pub kind: MemoryKind,

    /// Size of the address space in bytes
    #[serde(default = "MemoryConfig::default_size")]
    pub size: usize,

    /// Cache line size in bytes (power of two)
    #[serde(default = "MemoryConfig::default_line_size")]
    pub line_size: usize,

    /// Fixed cycles per access
    #[serde(default = "MemoryConfig::default_base_latency")]
    pub base_latency: u64,

    /// Cycles per line transferred
    #[serde(default = "MemoryConfig::default_line_latency")]
    pub line_latency: u64,

    /// Request buffer entries per port or bank; `null` means unbounded
    #[serde(default = "MemoryConfig::default_buffer_size")]
    pub buffer_size: Option<usize>,

    /// Ports of the parallel memory
    #[serde(default = "MemoryConfig::default_ports")]
    pub ports: usize,

    /// Banks of the banked memory
    #[serde(default = "MemoryConfig::default_banks")]
    pub banks: usize,
}

impl MemoryConfig {
    fn default_size() -> usize {
        defaults::MEMORY_SIZE
    }

    fn default_line_size() -> usize {
        defaults::LINE_SIZE
    }

    fn default_base_latency() -> u64 {
        defaults::BASE_LATENCY
    }

    fn default_line_latency() -> u64 {
        defaults::LINE_LATENCY
    }

    #[allow(clippy::unnecessary_wraps)]
    fn default_buffer_size() -> Option<usize> {
        Some(defaults::BUFFER_SIZE)
    }

    fn default_ports() -> usize {
        defaults::PORTS
    }

    fn default_banks() -> usize {
        defaults::BANKS
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            kind: MemoryKind::default(),
            size: defaults::MEMORY_SIZE,
            line_size: defaults::LINE_SIZE,
            base_latency: defaults::BASE_LATENCY,
            line_latency: defaults::LINE_LATENCY,
            buffer_size: Some(defaults::BUFFER_SIZE),
            ports: defaults::PORTS,
            banks: defaults::BANKS,
        }
    }
}

/// COMA ring configuration.
///
/// The ring holds `caches_per_ring * rings` caches; that product is also the
/// number of tokens per line.
#[derive(Debug, Clone, Deserialize)]
pub struct ComaConfig {
    /// Caches on each sub-ring
    #[serde(default = "ComaConfig::default_caches_per_ring")]
    pub caches_per_ring: usize,

    /// Number of sub-rings, each closed by a directory
    #[serde(default = "ComaConfig::default_rings")]
    pub rings: usize,

    /// Sets per cache
    #[serde(default = "ComaConfig::default_sets")]
    pub sets: usize,

    /// Ways per set
    #[serde(default = "ComaConfig::default_associativity")]
    pub associativity: usize,

    /// Merge-store buffer slots per cache
    #[serde(default = "ComaConfig::default_merge_slots")]
    pub merge_slots: usize,

    /// Victim buffer entries per cache
    #[serde(default = "ComaConfig::default_victim_entries")]
    pub victim_entries: usize,

    /// Depth of the cache lookup pipeline
    #[serde(default = "ComaConfig::default_lookup_latency")]
    pub lookup_latency: u64,

    /// Messages that may be injected into a link before it pushes back
    #[serde(default = "ComaConfig::default_link_capacity")]
    pub link_capacity: usize,

    /// Client requests queued per cache
    #[serde(default = "ComaConfig::default_request_buffer")]
    pub request_buffer: usize,

    /// Deferred-queue occupancy that blocks new client requests
    #[serde(default = "ComaConfig::default_deferred_high")]
    pub deferred_high: usize,

    /// Deferred-queue occupancy that unblocks new client requests
    #[serde(default = "ComaConfig::default_deferred_low")]
    pub deferred_low: usize,
}

impl ComaConfig {
    fn default_caches_per_ring() -> usize {
        defaults::CACHES_PER_RING
    }

    fn default_rings() -> usize {
        defaults::RINGS
    }

    fn default_sets() -> usize {
        defaults::SETS
    }

    fn default_associativity() -> usize {
        defaults::ASSOCIATIVITY
    }

    fn default_merge_slots() -> usize {
        defaults::MERGE_SLOTS
    }

    fn default_victim_entries() -> usize {
        defaults::VICTIM_ENTRIES
    }

    fn default_lookup_latency() -> u64 {
        defaults::LOOKUP_LATENCY
    }

    fn default_link_capacity() -> usize {
        defaults::LINK_CAPACITY
    }

    fn default_request_buffer() -> usize {
        defaults::REQUEST_BUFFER
    }

    fn default_deferred_high() -> usize {
        defaults::DEFERRED_HIGH
    }

    fn default_deferred_low() -> usize {
        defaults::DEFERRED_LOW
    }

    /// Total number of caches, which is also the token count per line.
    pub fn num_caches(&self) -> usize {
        self.caches_per_ring * self.rings
    }
}

impl Default for ComaConfig {
    fn default() -> Self {
        Self {
            caches_per_ring: defaults::CACHES_PER_RING,
            rings: defaults::RINGS,
            sets: defaults::SETS,
            associativity: defaults::ASSOCIATIVITY,
            merge_slots: defaults::MERGE_SLOTS,
            victim_entries: defaults::VICTIM_ENTRIES,
            lookup_latency: defaults::LOOKUP_LATENCY,
            link_capacity: defaults::LINK_CAPACITY,
            request_buffer: defaults::REQUEST_BUFFER,
            deferred_high: defaults::DEFERRED_HIGH,
            deferred_low: defaults::DEFERRED_LOW,
        }
    }
}

/// Core, thread and register file configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Cores in the grid; each is one memory client
    #[serde(default = "CoreConfig::default_cores")]
    pub cores: usize,

    /// Hardware threads per core
    #[serde(default = "CoreConfig::default_threads_per_core")]
    pub threads_per_core: usize,

    /// Register window per thread
    #[serde(default = "CoreConfig::default_regs_per_thread")]
    pub regs_per_thread: usize,

    /// Completed line reads buffered before memory is pushed back
    #[serde(default = "CoreConfig::default_completion_buffer")]
    pub completion_buffer: usize,
}

impl CoreConfig {
    fn default_cores() -> usize {
        defaults::CORES
    }

    fn default_threads_per_core() -> usize {
        defaults::THREADS_PER_CORE
    }

    fn default_regs_per_thread() -> usize {
        defaults::REGS_PER_THREAD
    }

    fn default_completion_buffer() -> usize {
        defaults::COMPLETION_BUFFER
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cores: defaults::CORES,
            threads_per_core: defaults::THREADS_PER_CORE,
            regs_per_thread: defaults::REGS_PER_THREAD,
            completion_buffer: defaults::COMPLETION_BUFFER,
        }
    }
}

/// Built-in workload selection.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Generator to use
    #[serde(default)]
    pub kind: WorkloadKind,

    /// Micro-ops per thread program (before the final halt)
    #[serde(default = "WorkloadConfig::default_ops_per_thread")]
    pub ops_per_thread: usize,

    /// First address touched by the workload
    #[serde(default)]
    pub base: u64,

    /// Distance between consecutive accesses
    #[serde(default = "WorkloadConfig::default_stride")]
    pub stride: u64,
}

impl WorkloadConfig {
    fn default_ops_per_thread() -> usize {
        defaults::OPS_PER_THREAD
    }

    fn default_stride() -> u64 {
        defaults::STRIDE
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            kind: WorkloadKind::default(),
            ops_per_thread: defaults::OPS_PER_THREAD,
            base: 0,
            stride: defaults::STRIDE,
        }
    }
}
