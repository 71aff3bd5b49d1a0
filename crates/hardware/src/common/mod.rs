//! Common utilities and types used throughout the simulator.
//!
//! This module provides the building blocks shared by the pipeline and the memory system:
//! 1. **Identifiers:** Strong types for memory addresses, registers, threads and clients.
//! 2. **Constants:** Maximum operation size, register width, the infinite buffer size.
//! 3. **Data:** Register serialization and sign extension.
//! 4. **Errors:** The fatal `SimError` taxonomy.

/// Address and identifier newtypes.
pub mod addr;

/// Common constants used throughout the simulator.
pub mod constants;

/// Register <-> byte conversion.
pub mod data;

/// Error types.
pub mod error;

pub use addr::{ClientId, MemAddr, RegAddr, ThreadId, WriteTag};
pub use constants::{INFINITE, MAX_MEMORY_OPERATION_SIZE, REGISTER_WIDTH};
pub use error::{SimError, SimResult};
