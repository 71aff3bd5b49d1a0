//! Shared memory subsystem.
//!
//! This module defines the memory client interface and the backends behind it. It provides:
//! 1. **Interface:** The `Memory` backend trait, the `MemoryClient` callback trait and the
//!    `ClientSet` router that delivers callbacks by `ClientId`.
//! 2. **Flat backends:** `FlatMemory` in its simple, parallel and banked arrangements, each a
//!    timed store behind bounded request buffers.
//! 3. **COMA:** A token-coherent ring of caches, directories and a root directory.
//!
//! Every call that can be refused returns `MemResult::Failed` instead of an error; the caller
//! stalls and retries next cycle. Errors are reserved for invalid arguments and broken
//! invariants.

/// Bounded request buffers.
pub mod buffer;
/// Token-coherent cache ring.
pub mod coma;
/// Flat timed memories (simple, parallel, banked).
pub mod flat;
/// Serial timing ports.
pub mod port;
/// Backing byte store.
pub mod storage;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::common::{ClientId, MemAddr, SimResult, WriteTag};
use crate::kernel::{Activity, Cycle};
use crate::stats::MemoryStats;

pub use coma::ComaMemory;
pub use flat::FlatMemory;

/// Reference-counted byte buffer attached to an in-flight write.
///
/// Cloning is cheap; mutating a shared payload copies it first.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(Arc<Vec<u8>>);

impl Payload {
    /// Wraps a byte vector.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(bytes))
    }

    /// Copies a slice into a new payload.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// Mutable access, copying the buffer if another handle shares it.
    pub fn make_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.0)
    }

    /// Returns true if this handle is the only owner of the buffer.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:02x?})", &self.0[..])
    }
}

/// Operation carried by a queued request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOp {
    /// Read `size` bytes.
    Read {
        /// Bytes to read.
        size: usize,
    },
    /// Write the payload, then acknowledge with `tag`.
    Write {
        /// Bytes to store.
        data: Payload,
        /// Tag handed back on completion.
        tag: WriteTag,
    },
}

impl RequestOp {
    /// Number of bytes the operation touches.
    pub fn size(&self) -> usize {
        match self {
            Self::Read { size } => *size,
            Self::Write { data, .. } => data.len(),
        }
    }
}

/// A client request queued inside a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Issuing client.
    pub client: ClientId,
    /// Start address.
    pub addr: MemAddr,
    /// Read or write.
    pub op: RequestOp,
}

/// Outcome of a read or write submitted to a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemResult<T> {
    /// Completed within the call.
    Ready(T),
    /// Accepted; completion arrives later through a `MemoryClient` callback.
    Delayed,
    /// Refused this cycle with no side effect; retry next cycle.
    Failed,
}

impl<T> MemResult<T> {
    /// Returns true for `Failed`.
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true for `Delayed`.
    pub const fn is_delayed(&self) -> bool {
        matches!(self, Self::Delayed)
    }
}

/// Callbacks a memory backend delivers to its clients.
///
/// Each callback returns false if the client cannot take it this cycle; the backend keeps
/// the completion and offers it again next cycle.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryClient {
    /// Data for a read this client issued.
    fn on_read_completed(&mut self, addr: MemAddr, data: &[u8]) -> bool;

    /// A write this client issued has become globally visible.
    fn on_write_completed(&mut self, tag: WriteTag) -> bool;

    /// Another client's write of `len` bytes at `addr` is pending. Returning false vetoes it.
    ///
    /// Backends ask every client before any of them sees the data, so this must not change
    /// client state.
    fn accepts_snoop(&self, addr: MemAddr, len: usize) -> bool;

    /// A write to `addr` that every client accepted is being performed.
    fn on_snooped(&mut self, addr: MemAddr, data: &[u8]);
}

/// Routes callbacks to clients by id.
pub trait ClientSet {
    /// Returns the client registered under `id`.
    fn client(&mut self, id: ClientId) -> Option<&mut dyn MemoryClient>;
}

impl<C: MemoryClient> ClientSet for Vec<C> {
    fn client(&mut self, id: ClientId) -> Option<&mut dyn MemoryClient> {
        self.get_mut(id.0).map(|c| c as &mut dyn MemoryClient)
    }
}

/// Looks up a client, turning an unknown id into an error.
pub(crate) fn client_mut(
    clients: &mut dyn ClientSet,
    id: ClientId,
) -> SimResult<&mut dyn MemoryClient> {
    clients
        .client(id)
        .ok_or_else(|| crate::common::SimError::invalid(format!("unknown memory client {}", id.0)))
}

/// A shared memory backend.
pub trait Memory: fmt::Debug {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// Registers a client and returns the id its callbacks will be routed by.
    fn register_client(&mut self, name: &str) -> SimResult<ClientId>;

    /// Submits a read of `size` bytes.
    fn read(&mut self, client: ClientId, addr: MemAddr, size: usize)
    -> SimResult<MemResult<Payload>>;

    /// Submits a write of `data.len()` bytes.
    ///
    /// `clients` is consulted for snoops before anything is queued.
    fn write(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        data: Payload,
        tag: WriteTag,
        clients: &mut dyn ClientSet,
    ) -> SimResult<MemResult<()>>;

    /// Advances the backend to cycle `now`, delivering completions that are due.
    fn cycle(&mut self, now: Cycle, clients: &mut dyn ClientSet) -> SimResult<Activity>;

    /// Returns true if no request is queued or in flight.
    fn is_idle(&self) -> bool;

    /// Returns true if `[addr, addr + size)` lies inside the simulated memory.
    fn check_address(&self, addr: MemAddr, size: usize) -> bool;

    /// Writes bytes directly into the backing store, bypassing timing and coherence.
    fn load(&mut self, addr: MemAddr, data: &[u8]) -> SimResult<()>;

    /// Reads the current coherent contents without timing.
    fn peek(&self, addr: MemAddr, len: usize) -> SimResult<Vec<u8>>;

    /// One `name: state` line per busy sub-unit, for deadlock reports.
    fn dump_state(&self) -> Vec<String>;

    /// Snapshot of the backend's counters.
    fn stats(&self) -> MemoryStats;
}
