//! Root directory.
//!
//! The root sits on the top ring in front of the backing store. A line that
//! no cache has touched is entirely at the root: all tokens plus the priority
//! token. Whenever the root holds any token for a line, its backing copy is
//! current, because every token that comes back either arrives from a clean
//! copy or brings its dirty data along.
//!
//! Messages that need data from the backing store wait in a delay line that
//! models the memory latency; everything else passes in one cycle.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::link::Link;
use super::message::{Message, MessageKind};
use crate::common::{INFINITE, MemAddr, SimError, SimResult};
use crate::kernel::{Cycle, DelayLine};
use crate::memory::storage::Storage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RootLine {
    tokens: usize,
    priority: bool,
}

/// Root of the directory hierarchy, owner of the backing store.
#[derive(Debug)]
pub struct RootDirectory {
    num_tokens: usize,
    line_size: usize,
    /// Lines not entirely at the root.
    lines: HashMap<MemAddr, RootLine>,
    storage: Storage,
    memory: DelayLine<Message>,
}

impl RootDirectory {
    /// Creates a root over `storage` with the given backing-store latency.
    pub fn new(num_tokens: usize, line_size: usize, storage: Storage, latency: u64) -> Self {
        Self {
            num_tokens,
            line_size,
            lines: HashMap::new(),
            storage,
            memory: DelayLine::new(latency, INFINITE),
        }
    }

    fn line(&self, line: MemAddr) -> RootLine {
        self.lines.get(&line).copied().unwrap_or(RootLine {
            tokens: self.num_tokens,
            priority: true,
        })
    }

    fn set_line(&mut self, line: MemAddr, state: RootLine) {
        if state.tokens == self.num_tokens {
            let _ = self.lines.remove(&line);
        } else {
            let _ = self.lines.insert(line, state);
        }
    }

    /// Tokens and priority the root holds for `line`.
    pub fn holding(&self, line: MemAddr) -> (usize, bool) {
        let l = self.line(line);
        (l.tokens, l.priority)
    }

    /// Lines with tokens outside the root.
    pub fn lines_out(&self) -> impl Iterator<Item = MemAddr> + '_ {
        self.lines.keys().copied()
    }

    /// Backing store.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Mutable backing store, for administrative loads.
    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Messages waiting on the backing store.
    pub fn in_flight(&self) -> impl Iterator<Item = &Message> {
        self.memory.iter()
    }

    /// Returns true if no message is waiting on the backing store.
    pub fn is_idle(&self) -> bool {
        self.memory.is_empty()
    }

    /// Processes one cycle: releases messages whose data is ready, then
    /// handles at most one message from the top ring.
    pub fn cycle(&mut self, now: Cycle, input: &mut Link, output: &mut Link) -> SimResult<bool> {
        let mut progressed = false;
        while let Some(mut msg) = self.memory.pop_ready(now) {
            msg.data = Some(self.storage.read(msg.address, self.line_size)?.to_vec());
            trace!(%msg, "root data ready");
            output.forward(msg);
            progressed = true;
        }

        if let Some(msg) = input.pop() {
            progressed = true;
            if let Some(msg) = self.handle(msg)? {
                if msg.data.is_none() && msg.tokens > 0 {
                    if let Err(msg) = self.memory.push(now, msg) {
                        return Err(SimError::coherence(format!(
                            "root memory pipeline refused {msg}"
                        )));
                    }
                } else {
                    output.forward(msg);
                }
            }
        }
        Ok(progressed)
    }

    /// Applies a message to the root's token state. Returns the message if it
    /// continues around the ring.
    fn handle(&mut self, mut msg: Message) -> SimResult<Option<Message>> {
        let mut line = self.line(msg.address);
        match msg.kind {
            MessageKind::Request if msg.tokens == 0 && line.tokens > 0 => {
                let grant = if line.tokens == self.num_tokens {
                    self.num_tokens
                } else {
                    1
                };
                msg.tokens = grant;
                line.tokens -= grant;
                if line.tokens == 0 {
                    msg.priority = line.priority;
                    line.priority = false;
                }
                msg.kind = MessageKind::RequestData;
                debug!(%msg, "root grants read");
            }
            MessageKind::RequestDataToken if line.tokens > 0 => {
                msg.tokens += line.tokens;
                msg.priority |= line.priority;
                line = RootLine {
                    tokens: 0,
                    priority: false,
                };
                debug!(%msg, "root grants tokens");
            }
            MessageKind::Eviction => {
                line.tokens += msg.tokens;
                line.priority |= msg.priority;
                if line.tokens > self.num_tokens {
                    return Err(SimError::coherence(format!(
                        "root holds {} of {} tokens after {msg}",
                        line.tokens, self.num_tokens
                    )));
                }
                if msg.dirty {
                    if let Some(data) = &msg.data {
                        self.storage.write(msg.address, data)?;
                    }
                }
                debug!(%msg, "root absorbs eviction");
                self.set_line(msg.address, line);
                return Ok(None);
            }
            _ => return Ok(Some(msg)),
        }
        self.set_line(msg.address, line);
        Ok(Some(msg))
    }
}
