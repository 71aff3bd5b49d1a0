//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for the microgrid simulator. It provides:
//! 1. **Summary:** Total cycles, retired micro-ops and wall-clock speed.
//! 2. **Pipeline:** Loads, stores, immediate versus delayed completions and stalls by cause.
//! 3. **Threads:** Suspensions, wakeups and family teardowns.
//! 4. **Memory:** Backend counters, including ring traffic for the COMA hierarchy.

use std::time::Instant;

/// Counters kept by a memory backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Reads accepted.
    pub reads: u64,
    /// Writes accepted.
    pub writes: u64,
    /// Requests refused because a buffer was full or admission was closed.
    pub rejected: u64,
    /// Reads answered within the call.
    pub read_hits: u64,
    /// Snoop callbacks issued.
    pub snoops: u64,
    /// Writes (or updates) held back by a snoop veto.
    pub snoop_vetoes: u64,
    /// Completion callbacks refused by a client and offered again.
    pub callback_retries: u64,

    /// Plain read requests put on the ring.
    pub msg_request: u64,
    /// Read requests that picked up data on the ring.
    pub msg_request_data: u64,
    /// Token acquisitions put on the ring.
    pub msg_request_data_token: u64,
    /// Evictions put on the ring.
    pub msg_eviction: u64,
    /// Updates put on the ring.
    pub msg_update: u64,
    /// Messages sent around the ring again after returning unsatisfied.
    pub recirculations: u64,

    /// Writes merged into an existing merge-buffer slot.
    pub merges: u64,
    /// Merge-buffer slots allocated.
    pub merge_allocations: u64,
    /// Reads refused because a merge slot could not cover them.
    pub merge_locks: u64,
    /// Requests answered from a victim buffer.
    pub victim_hits: u64,
    /// Lines moved to a victim buffer.
    pub evictions: u64,
    /// Client requests parked in a deferred queue.
    pub deferred: u64,
    /// Service-queue retries and postponements.
    pub service_retries: u64,
}

/// Simulation statistics structure tracking all performance metrics.
#[derive(Clone, Debug)]
pub struct SimStats {
    pub(crate) start_time: Instant,
    /// Total simulator cycles elapsed.
    pub cycles: u64,
    /// Micro-ops that left the pipeline.
    pub ops_retired: u64,

    /// Loads issued to the memory stage.
    pub loads: u64,
    /// Stores accepted by memory.
    pub stores: u64,
    /// Loads answered within the memory call.
    pub loads_immediate: u64,
    /// Loads that went pending.
    pub loads_delayed: u64,
    /// Loads chained onto a line that already had a read in flight.
    pub loads_chained: u64,
    /// Loads to an invalid address, cleared without a request.
    pub loads_invalid: u64,

    /// Memory-stage stalls because the backend refused the request.
    pub stalls_mem: u64,
    /// Memory-stage stalls ordering a store behind pending loads to its line.
    pub stalls_ordering: u64,
    /// Register writes stalled on the thread wakeup port.
    pub stalls_wake: u64,
    /// Cycles the memory stage waited on a full writeback latch.
    pub stalls_writeback: u64,

    /// Threads suspended on a pending register.
    pub suspensions: u64,
    /// Threads woken by a register write.
    pub wakeups: u64,
    /// Families torn down after all their threads finished.
    pub families_completed: u64,

    /// Counters of the memory backend.
    pub memory: MemoryStats,
}

impl Default for SimStats {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            ops_retired: 0,
            loads: 0,
            stores: 0,
            loads_immediate: 0,
            loads_delayed: 0,
            loads_chained: 0,
            loads_invalid: 0,
            stalls_mem: 0,
            stalls_ordering: 0,
            stalls_wake: 0,
            stalls_writeback: 0,
            suspensions: 0,
            wakeups: 0,
            families_completed: 0,
            memory: MemoryStats::default(),
        }
    }
}

/// Section names for selective stats output.
///
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "pipeline", "threads", "memory", "ring"];

impl SimStats {
    /// Adds the per-core counters of `other` into `self`.
    ///
    /// Cycle count, start time and memory counters are left alone.
    pub fn accumulate(&mut self, other: &Self) {
        self.ops_retired += other.ops_retired;
        self.loads += other.loads;
        self.stores += other.stores;
        self.loads_immediate += other.loads_immediate;
        self.loads_delayed += other.loads_delayed;
        self.loads_chained += other.loads_chained;
        self.loads_invalid += other.loads_invalid;
        self.stalls_mem += other.stalls_mem;
        self.stalls_ordering += other.stalls_ordering;
        self.stalls_wake += other.stalls_wake;
        self.stalls_writeback += other.stalls_writeback;
        self.suspensions += other.suspensions;
        self.wakeups += other.wakeups;
        self.families_completed += other.families_completed;
    }

    /// Prints every section to stdout.
    pub fn print(&self) {
        self.print_sections(&[]);
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// # Arguments
    ///
    /// * `sections` - Names from [`STATS_SECTIONS`], or empty for all.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |name: &str| sections.is_empty() || sections.iter().any(|s| s == name);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let per_k = |n: u64| {
            if self.cycles == 0 {
                0.0
            } else {
                n as f64 * 1000.0 / self.cycles as f64
            }
        };

        if want("summary") {
            println!("\n==========================================================");
            println!("MGSIM SIMULATION STATISTICS");
            println!("==========================================================");
            println!("host_seconds             {elapsed:.4} s");
            println!("sim_cycles               {}", self.cycles);
            println!("sim_ops                  {}", self.ops_retired);
            if elapsed > 0.0 {
                println!(
                    "sim_speed                {:.3} kHz",
                    self.cycles as f64 / elapsed / 1000.0
                );
            }
        }

        if want("pipeline") {
            println!("\nPIPELINE");
            println!("  loads                  {}", self.loads);
            println!("    immediate            {}", self.loads_immediate);
            println!("    delayed              {}", self.loads_delayed);
            println!("    chained              {}", self.loads_chained);
            println!("    invalid address      {}", self.loads_invalid);
            println!("  stores                 {}", self.stores);
            println!("  stalls");
            println!(
                "    memory               {} ({:.2}/kcycle)",
                self.stalls_mem,
                per_k(self.stalls_mem)
            );
            println!("    ordering             {}", self.stalls_ordering);
            println!("    wake port            {}", self.stalls_wake);
            println!("    writeback latch      {}", self.stalls_writeback);
        }

        if want("threads") {
            println!("\nTHREADS");
            println!("  suspensions            {}", self.suspensions);
            println!("  wakeups                {}", self.wakeups);
            println!("  families completed     {}", self.families_completed);
        }

        let m = &self.memory;
        if want("memory") {
            println!("\nMEMORY");
            println!("  reads                  {}", m.reads);
            println!("  writes                 {}", m.writes);
            println!("  read hits              {}", m.read_hits);
            println!("  rejected               {}", m.rejected);
            println!("  snoops                 {} ({} vetoed)", m.snoops, m.snoop_vetoes);
            println!("  callback retries       {}", m.callback_retries);
        }

        if want("ring") {
            println!("\nRING");
            println!("  request                {}", m.msg_request);
            println!("  request+data           {}", m.msg_request_data);
            println!("  request+data+token     {}", m.msg_request_data_token);
            println!("  eviction               {}", m.msg_eviction);
            println!("  update                 {}", m.msg_update);
            println!("  recirculations         {}", m.recirculations);
            println!("  merges                 {} ({} slots)", m.merges, m.merge_allocations);
            println!("  merge locks            {}", m.merge_locks);
            println!("  victim hits            {}", m.victim_hits);
            println!("  evictions              {}", m.evictions);
            println!("  deferred               {}", m.deferred);
            println!("  service retries        {}", m.service_retries);
        }
        println!("==========================================================");
    }
}
