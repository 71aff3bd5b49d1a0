//! Simulation error definitions.
//!
//! This module defines the fatal error taxonomy of the simulator. It provides:
//! 1. **Structural errors:** Illegal micro-ops and invalid arguments that abort the run.
//! 2. **Protocol errors:** Register state-machine and coherence invariant violations.
//! 3. **Liveness errors:** Deadlock reports carrying a dump of every busy component.
//!
//! Backpressure is deliberately absent here: a stall is an ordinary return value
//! (`MemResult::Failed`, `Ok(false)`, `StageResult::Stall`), never a `SimError`.

use thiserror::Error;

/// Fatal simulation errors.
///
/// Every variant aborts the current run; none of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// A micro-op violated decode-time rules (e.g. register window overflow).
    #[error("illegal instruction at pc {pc}: {reason}")]
    IllegalInstruction {
        /// Index of the offending micro-op in its thread's program.
        pc: usize,
        /// Human-readable description of the violation.
        reason: String,
    },

    /// Programming or configuration error (out-of-range index, oversized operation).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The register state machine rejected a transition.
    #[error("register {addr}: {reason}")]
    RegisterProtocol {
        /// Register address that was written.
        addr: usize,
        /// Description of the illegal transition.
        reason: String,
    },

    /// A coherence invariant (token conservation, priority placement) does not hold.
    #[error("coherence violation: {0}")]
    Coherence(String),

    /// No component made progress for the configured threshold while work remained.
    #[error("deadlock detected at cycle {cycle} after {idle_cycles} idle cycles; busy: {}", components.join(", "))]
    Deadlock {
        /// Cycle at which the deadlock was declared.
        cycle: u64,
        /// Number of consecutive cycles without progress.
        idle_cycles: u64,
        /// `name: state` lines for every non-idle component.
        components: Vec<String>,
    },

    /// The configuration could not be read, parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SimError {
    /// Shorthand for an [`SimError::InvalidArgument`] built from anything displayable.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Shorthand for a [`SimError::Coherence`] violation.
    pub fn coherence(msg: impl Into<String>) -> Self {
        Self::Coherence(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
