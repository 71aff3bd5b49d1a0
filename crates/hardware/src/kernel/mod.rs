//! Cycle kernel primitives.
//!
//! Every hardware unit in the simulator advances in lockstep, one clock tick at a
//! time, under an acquire/commit discipline:
//! 1. **Acquire:** Units compute proposals and request shared resources.
//! 2. **Arbitration:** Conflicting requests are resolved by a fixed priority.
//! 3. **Commit:** Only winners apply durable changes; losers retry next cycle.
//!
//! This module holds the small building blocks the units share: the component
//! registry, fixed-priority ports, fixed-depth delay lines and a
//! generation-checked arena.

/// Fixed-priority arbitrated ports.
pub mod arbitration;

/// Generation-checked slot arena.
pub mod arena;

/// Fixed-depth shift registers.
pub mod delay;

/// Component naming registry.
pub mod registry;

pub use arbitration::ArbitratedPort;
pub use arena::{Arena, Handle};
pub use delay::DelayLine;
pub use registry::{ComponentId, ComponentRegistry};

/// Simulated clock cycle.
pub type Cycle = u64;

/// Outcome of one cycle of a unit, used for deadlock detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Activity {
    /// Something durable changed this cycle.
    pub progressed: bool,
    /// Work remains outstanding (requests queued, threads alive).
    pub busy: bool,
}

impl Activity {
    /// Nothing happened and nothing is pending.
    pub const IDLE: Self = Self {
        progressed: false,
        busy: false,
    };

    /// Combines the activity of two units.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            progressed: self.progressed || other.progressed,
            busy: self.busy || other.busy,
        }
    }
}
