//! Simulation driver and image loading.
//!
//! Provides the top-level `Simulator`, which owns the cores and the memory
//! backend and advances them in lockstep, and utilities for loading raw
//! memory images before a run.

/// Raw memory image loading.
pub mod loader;

/// Top-level simulator.
pub mod simulator;

pub use simulator::{RunOutcome, Simulator, StopReason};
