//! Sub-ring directory.
//!
//! A directory sits on the top ring and closes one sub-ring of caches. It has
//! two inputs: the top ring (messages from other segments or the root) and the
//! bottom of its own sub-ring. Per line it counts:
//! 1. **Tokens:** How many tokens are currently inside the sub-ring.
//! 2. **Requests:** How many foreign messages are currently inside the sub-ring.
//!
//! A foreign message only enters the sub-ring when there are tokens to be had
//! there, and a line entry is dropped once both counts are zero.

use std::collections::HashMap;
use std::ops::Range;

use tracing::trace;

use super::message::{Message, MessageKind};
use crate::common::{MemAddr, SimError, SimResult};

/// Where a directory sends a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Into the sub-ring, towards its first cache.
    Down,
    /// Onto the top ring, towards the next directory or the root.
    Up,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DirLine {
    tokens: usize,
    requests: usize,
}

/// Directory of one sub-ring.
#[derive(Debug, Clone)]
pub struct Directory {
    name: String,
    caches: Range<usize>,
    num_tokens: usize,
    lines: HashMap<MemAddr, DirLine>,
}

impl Directory {
    /// Creates the directory for the caches in `caches`.
    pub fn new(name: impl Into<String>, caches: Range<usize>, num_tokens: usize) -> Self {
        Self {
            name: name.into(),
            caches,
            num_tokens,
            lines: HashMap::new(),
        }
    }

    /// Directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_local(&self, msg: &Message) -> bool {
        self.caches.contains(&msg.sender)
    }

    /// Tokens the directory believes are inside its sub-ring for `line`.
    pub fn tokens_below(&self, line: MemAddr) -> usize {
        self.lines.get(&line).map_or(0, |l| l.tokens)
    }

    /// Number of lines with tokens or foreign requests below.
    pub fn tracked_lines(&self) -> usize {
        self.lines.len()
    }

    /// Routes a message arriving from the last cache of the sub-ring.
    pub fn from_bottom(&mut self, msg: &Message) -> SimResult<Route> {
        let route = if self.is_local(msg) {
            let home = match msg.kind {
                MessageKind::Request | MessageKind::RequestData => msg.read_satisfied(),
                MessageKind::RequestDataToken => msg.tokens == self.num_tokens,
                MessageKind::Eviction | MessageKind::Update => false,
            };
            if home { Route::Down } else { Route::Up }
        } else {
            Route::Up
        };
        if route == Route::Up {
            self.account(msg, route, !self.is_local(msg))?;
        }
        trace!(dir = %self.name, %msg, ?route, "from bottom");
        Ok(route)
    }

    /// Routes a message arriving from the top ring.
    pub fn from_top(&mut self, msg: &Message) -> SimResult<Route> {
        let local = self.is_local(msg);
        let route = if local {
            Route::Down
        } else {
            match msg.kind {
                MessageKind::Update => Route::Down,
                MessageKind::Request | MessageKind::RequestData if msg.tokens > 0 => Route::Up,
                MessageKind::Request
                | MessageKind::RequestData
                | MessageKind::RequestDataToken
                | MessageKind::Eviction => {
                    if self.tokens_below(msg.address) > 0 {
                        Route::Down
                    } else {
                        Route::Up
                    }
                }
            }
        };
        if route == Route::Down {
            self.account(msg, route, !local)?;
        }
        trace!(dir = %self.name, %msg, ?route, "from top");
        Ok(route)
    }

    /// Foreign evictions may be absorbed below, so only messages that are
    /// certain to come back out are counted as requests.
    fn account(&mut self, msg: &Message, route: Route, foreign: bool) -> SimResult<()> {
        let foreign = foreign && msg.kind != MessageKind::Eviction;
        let entry = self.lines.entry(msg.address).or_default();
        match route {
            Route::Down => {
                entry.tokens += msg.tokens;
                if foreign {
                    entry.requests += 1;
                }
            }
            Route::Up => {
                entry.tokens = entry.tokens.checked_sub(msg.tokens).ok_or_else(|| {
                    SimError::coherence(format!(
                        "{}: {msg} leaves with more tokens than the sub-ring holds",
                        self.name
                    ))
                })?;
                if foreign {
                    entry.requests = entry.requests.checked_sub(1).ok_or_else(|| {
                        SimError::coherence(format!(
                            "{}: {msg} leaves but no foreign request was inside",
                            self.name
                        ))
                    })?;
                }
            }
        }
        if *entry == DirLine::default() {
            let _ = self.lines.remove(&msg.address);
        }
        Ok(())
    }
}
