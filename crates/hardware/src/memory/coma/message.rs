//! Ring messages.
//!
//! One tagged message type circulates on the ring. Its kind tells every node
//! what the originating cache is after, and the message itself carries the
//! tokens, priority flag and data it has picked up along the way.

use std::fmt;

use super::merge::Writer;
use crate::common::MemAddr;

/// What a message is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Read miss; wants data and one token.
    Request,
    /// Read miss that has picked up data and a token.
    RequestData,
    /// Write; wants every token for the line.
    RequestDataToken,
    /// Tokens (and dirty data) leaving an evicted line.
    Eviction,
    /// Bytes of a committed write, shown to every cache's clients.
    Update,
}

/// Bytes written by a committed merge, plus the writes to acknowledge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineUpdate {
    /// Line contents; only bytes under `mask` were written.
    pub data: Vec<u8>,
    /// Written bytes.
    pub mask: Vec<bool>,
    /// Writes acknowledged when the update returns to its sender.
    pub writers: Vec<Writer>,
}

impl LineUpdate {
    /// Byte range spanned by the mask.
    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        let first = self.mask.iter().position(|&m| m)?;
        let last = self.mask.iter().rposition(|&m| m)?;
        Some(first..last + 1)
    }
}

/// A message travelling the ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Current kind.
    pub kind: MessageKind,
    /// Line address.
    pub address: MemAddr,
    /// Index of the cache that created the message.
    pub sender: usize,
    /// Tokens carried.
    pub tokens: usize,
    /// The priority token is among `tokens`.
    pub priority: bool,
    /// The carried data differs from the root's backing store.
    pub dirty: bool,
    /// Line data, once some holder supplied it.
    pub data: Option<Vec<u8>>,
    /// Payload of an `Update`.
    pub update: Option<LineUpdate>,
}

impl Message {
    /// Creates a message with no tokens and no data.
    pub const fn new(kind: MessageKind, address: MemAddr, sender: usize) -> Self {
        Self {
            kind,
            address,
            sender,
            tokens: 0,
            priority: false,
            dirty: false,
            data: None,
            update: None,
        }
    }

    /// Returns true if a read request already has what its sender needs.
    pub fn read_satisfied(&self) -> bool {
        matches!(self.kind, MessageKind::Request | MessageKind::RequestData)
            && self.tokens > 0
            && self.data.is_some()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} from cache {} ({} tokens{}{})",
            self.kind,
            self.address,
            self.sender,
            self.tokens,
            if self.priority { ", priority" } else { "" },
            if self.dirty { ", dirty" } else { "" }
        )
    }
}
