//! Merge-store buffer.
//!
//! While a cache is collecting the tokens it needs to write a line, further
//! writes to that line are coalesced into one slot instead of each starting its
//! own transaction. A slot holds:
//! 1. **Data and mask:** The merged bytes and which of them were written.
//! 2. **Writers:** Every `(client, tag)` that contributed, released together.
//! 3. **Lock:** Set when a read found bytes covered by neither the slot nor the line.
//!
//! Slots live in a generation-checked arena, so a handle kept across a commit
//! cannot alias the next occupant of the same slot.

use crate::common::{ClientId, MemAddr, WriteTag};
use crate::kernel::{Arena, Handle};

/// A client write waiting for its acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Writer {
    /// Issuing client.
    pub client: ClientId,
    /// Tag handed back on completion.
    pub tag: WriteTag,
}

/// Coalesced writes to one line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSlot {
    /// Line address.
    pub line: MemAddr,
    /// Merged bytes; only meaningful where `mask` is set.
    pub data: Vec<u8>,
    /// Bytes written so far.
    pub mask: Vec<bool>,
    /// Contributing writes, oldest first.
    pub writers: Vec<Writer>,
    /// A read is waiting for bytes this slot cannot provide.
    pub locked: bool,
}

impl MergeSlot {
    fn new(line: MemAddr, line_size: usize) -> Self {
        Self {
            line,
            data: vec![0; line_size],
            mask: vec![false; line_size],
            writers: Vec::new(),
            locked: false,
        }
    }
}

/// Why a write could not be merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeError {
    /// The line's slot is locked by an unsatisfied read.
    Locked,
    /// The line has no slot and none is free.
    Full,
}

/// Fixed pool of merge slots.
#[derive(Debug, Clone)]
pub struct MergeBuffer {
    slots: Arena<MergeSlot>,
    line_size: usize,
}

impl MergeBuffer {
    /// Creates a buffer with `slots` slots for lines of `line_size` bytes.
    pub fn new(slots: usize, line_size: usize) -> Self {
        Self {
            slots: Arena::new(slots),
            line_size,
        }
    }

    fn find(&self, line: MemAddr) -> Option<Handle> {
        self.slots.find(|s| s.line == line)
    }

    /// Returns true if `line` has a slot.
    pub fn contains(&self, line: MemAddr) -> bool {
        self.find(line).is_some()
    }

    /// Returns the slot for `line`.
    pub fn get(&self, line: MemAddr) -> Option<&MergeSlot> {
        self.find(line).and_then(|h| self.slots.get(h))
    }

    /// Returns true if a new line could be given a slot.
    pub fn has_free(&self) -> bool {
        self.slots.len() < self.slots.capacity()
    }

    /// Returns true if merging into `line` would succeed right now.
    pub fn can_merge(&self, line: MemAddr) -> bool {
        match self.get(line) {
            Some(slot) => !slot.locked,
            None => self.has_free(),
        }
    }

    /// Merges `data` at `offset` within `line`.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if a slot was allocated for this write, `Ok(false)` if it
    /// joined an existing one.
    pub fn merge(
        &mut self,
        line: MemAddr,
        offset: usize,
        data: &[u8],
        writer: Writer,
    ) -> Result<bool, MergeError> {
        let (handle, allocated) = match self.find(line) {
            Some(h) => (h, false),
            None => {
                let h = self
                    .slots
                    .insert(MergeSlot::new(line, self.line_size))
                    .map_err(|_| MergeError::Full)?;
                (h, true)
            }
        };
        let slot = self.slots.get_mut(handle).ok_or(MergeError::Full)?;
        if slot.locked {
            return Err(MergeError::Locked);
        }
        slot.data[offset..offset + data.len()].copy_from_slice(data);
        slot.mask[offset..offset + data.len()]
            .iter_mut()
            .for_each(|m| *m = true);
        slot.writers.push(writer);
        Ok(allocated)
    }

    /// Reads `size` bytes at `offset` of `line`, combining the slot with the
    /// line's own data when the line has any.
    ///
    /// Returns `None` and locks the slot if some byte is covered by neither.
    /// Lines without a slot read straight from `backing`.
    pub fn read(
        &mut self,
        line: MemAddr,
        offset: usize,
        size: usize,
        backing: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        let range = offset..offset + size;
        let Some(handle) = self.find(line) else {
            return backing.map(|b| b[range].to_vec());
        };
        let slot = self.slots.get_mut(handle)?;
        let mut out = Vec::with_capacity(size);
        for i in range {
            if slot.mask[i] {
                out.push(slot.data[i]);
            } else if let Some(b) = backing {
                out.push(b[i]);
            } else {
                slot.locked = true;
                return None;
            }
        }
        Some(out)
    }

    /// Frees the slot for `line`, returning its contents.
    pub fn take(&mut self, line: MemAddr) -> Option<MergeSlot> {
        let handle = self.find(line)?;
        self.slots.remove(handle)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot is in use.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
