//! Microgrid simulator library.
//!
//! This crate implements a cycle-accurate simulator of a many-core microgrid with the following:
//! 1. **Kernel:** Lockstep cycles, component registry, arbitrated ports and delay lines.
//! 2. **Core:** Dataflow register file, hardware threads and the pipeline stages around memory.
//! 3. **Memory:** Flat timed backends and a token-coherent COMA ring of caches and directories.
//! 4. **Simulation:** Top-level driver, image loader, configuration and statistics.

/// Common types and constants (addresses, identifiers, errors, register data).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Cores (register file, threads, pipeline stages, workloads).
pub mod core;
/// Cycle kernel primitives (registry, arbitration, delay lines, arena).
pub mod kernel;
/// Memory interface and backends (flat memories, COMA ring).
pub mod memory;
/// Simulator driver and image loader.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or load from JSON.
pub use crate::config::Config;
/// Fatal simulation error and result alias.
pub use crate::common::{SimError, SimResult};
/// Top-level simulator; construct with `Simulator::new`.
pub use crate::sim::Simulator;
