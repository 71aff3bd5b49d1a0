//! # Unit Components
//!
//! This module serves as the central hub for the subsystem tests, from the
//! register file state machine up to whole-grid simulations.

/// Configuration loading, defaults and validation.
pub mod config;

/// Memory backends: flat timing ports and the COMA ring.
pub mod memory;

/// Pipeline memory stage through a real core.
pub mod pipeline;

/// Register file state machine properties.
pub mod regfile;

/// Whole-grid runs, deadlock detection and image loading.
pub mod sim;
