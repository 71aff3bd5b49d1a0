//! Backing byte store.
//!
//! A flat, zero-initialised byte array standing in for DRAM. All accesses are
//! bounds checked; timing lives in the ports in front of it.

use crate::common::{MemAddr, SimError, SimResult};

/// Zero-initialised simulated memory contents.
#[derive(Clone)]
pub struct Storage {
    bytes: Vec<u8>,
}

impl Storage {
    /// Allocates `size` bytes of zeroed memory.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Size of the store in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-sized store.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true if `[addr, addr + size)` is inside the store.
    pub fn contains(&self, addr: MemAddr, size: usize) -> bool {
        usize::try_from(addr.val())
            .ok()
            .and_then(|start| start.checked_add(size))
            .is_some_and(|end| end <= self.bytes.len())
    }

    fn range(&self, addr: MemAddr, size: usize) -> SimResult<std::ops::Range<usize>> {
        if !self.contains(addr, size) {
            return Err(SimError::invalid(format!(
                "access of {size} bytes at {addr} outside {} bytes of memory",
                self.bytes.len()
            )));
        }
        let start = addr.val() as usize;
        Ok(start..start + size)
    }

    /// Borrows `size` bytes at `addr`.
    pub fn read(&self, addr: MemAddr, size: usize) -> SimResult<&[u8]> {
        let range = self.range(addr, size)?;
        Ok(&self.bytes[range])
    }

    /// Overwrites bytes at `addr`.
    pub fn write(&mut self, addr: MemAddr, data: &[u8]) -> SimResult<()> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Overwrites only the bytes whose `mask` entry is set.
    pub fn write_masked(&mut self, addr: MemAddr, data: &[u8], mask: &[bool]) -> SimResult<()> {
        let range = self.range(addr, data.len())?;
        for ((dst, src), keep) in self.bytes[range].iter_mut().zip(data).zip(mask) {
            if *keep {
                *dst = *src;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("len", &self.bytes.len())
            .finish()
    }
}
