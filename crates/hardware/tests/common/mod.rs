/// Configurations, tracing setup and cycle loops.
pub mod harness;

/// Memory client test doubles.
pub mod mocks;
