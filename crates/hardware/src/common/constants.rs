//! System-wide constants.

/// Largest single memory operation, in bytes. Also the largest supported line size.
pub const MAX_MEMORY_OPERATION_SIZE: usize = 64;

/// Width of an architectural register, in bytes.
pub const REGISTER_WIDTH: usize = 8;

/// Buffer size meaning "never reject".
pub const INFINITE: usize = usize::MAX;
