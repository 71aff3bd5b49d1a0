//! Pipeline latch structures for inter-stage communication.
//!
//! This module defines the entries carried between the stages of a core:
//! Issue → Memory → Writeback, plus the completion queue that feeds delayed
//! load data back into the register file.
//!
//! 1. **Instruction Flow:** One entry per latch; a full latch stalls the stage behind it.
//! 2. **Absolute Registers:** Register addresses are already translated to the
//!    thread's window when they enter a latch.

use crate::common::{MemAddr, RegAddr, ThreadId};

/// Entry in the issue/memory latch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssueMemEntry {
    /// Load into `rd`.
    Load {
        /// Issuing thread.
        thread: ThreadId,
        /// Destination register.
        rd: RegAddr,
        /// Address to load from.
        addr: MemAddr,
        /// Bytes loaded.
        size: usize,
        /// Sign-extend the loaded value.
        sign_extend: bool,
    },
    /// Store the low `size` bytes of `value`.
    Store {
        /// Issuing thread.
        thread: ThreadId,
        /// Value read from the source register.
        value: u64,
        /// Address to store to.
        addr: MemAddr,
        /// Bytes stored.
        size: usize,
    },
    /// An already computed result passing through to writeback.
    Value {
        /// Issuing thread.
        thread: ThreadId,
        /// Destination register.
        rd: RegAddr,
        /// Result.
        value: u64,
    },
}

impl IssueMemEntry {
    /// Thread that issued the entry.
    pub const fn thread(&self) -> ThreadId {
        match self {
            Self::Load { thread, .. } | Self::Store { thread, .. } | Self::Value { thread, .. } => {
                *thread
            }
        }
    }
}

/// Entry in the memory/writeback latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WritebackEntry {
    /// Thread to retire once the value is written.
    pub thread: ThreadId,
    /// Destination register.
    pub rd: RegAddr,
    /// Value to write.
    pub value: u64,
}

/// A completed line read waiting to fill its chain of registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionEntry {
    /// Line address.
    pub line: MemAddr,
    /// Line contents.
    pub data: Vec<u8>,
    /// Next register of the chain to complete.
    pub next: Option<RegAddr>,
}

impl CompletionEntry {
    /// Copies the bytes of `[addr, addr + bytes.len())` that fall inside this line.
    pub fn patch(&mut self, addr: MemAddr, bytes: &[u8]) {
        let line_end = self.line.0 + self.data.len() as u64;
        let start = addr.0.max(self.line.0);
        let end = (addr.0 + bytes.len() as u64).min(line_end);
        if start >= end {
            return;
        }
        let dst = (start - self.line.0) as usize;
        let src = (start - addr.0) as usize;
        let len = (end - start) as usize;
        self.data[dst..dst + len].copy_from_slice(&bytes[src..src + len]);
    }
}
