//! Strongly typed identifiers and addresses.
//!
//! Memory addresses, register addresses, thread ids and client ids are all plain
//! integers in hardware; wrapping them keeps them from being mixed up at the
//! seams between the pipeline and the memory system.

use std::fmt;

/// Byte address in the simulated shared memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemAddr(pub u64);

impl MemAddr {
    /// Returns the raw address value.
    #[inline]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Returns the address of the cache line containing this address.
    ///
    /// `line_size` must be a power of two.
    #[inline]
    pub const fn line(self, line_size: usize) -> Self {
        Self(self.0 & !(line_size as u64 - 1))
    }

    /// Returns the byte offset of this address within its cache line.
    #[inline]
    pub const fn line_offset(self, line_size: usize) -> usize {
        (self.0 & (line_size as u64 - 1)) as usize
    }

    /// Returns this address advanced by `bytes`.
    #[inline]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for MemAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Index of a register slot in a core's register file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegAddr(pub usize);

impl fmt::Display for RegAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Hardware thread slot within a core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identity of a client registered with a memory backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub usize);

/// Opaque tag handed back to the writer by `on_write_completed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WriteTag(pub u64);
