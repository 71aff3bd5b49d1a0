//! COMA cache node.
//!
//! Each cache sits on a sub-ring and serves the clients mapped to it. It has
//! two sides that share the set-associative line array:
//! 1. **Network:** Messages from the ring enter a lookup pipeline; the head is
//!    matched against the lines and victims, then consumed or forwarded.
//! 2. **Client:** Reads that hit are answered within the call. Everything else
//!    goes through a bounded request queue, is serviced one request per cycle,
//!    and parks in the deferred queue while its line is in transit.
//!
//! A line holds data exactly when it holds at least one token. Every holder's
//! data is current, since a write first collects all tokens.

use std::collections::VecDeque;
use std::ops::Range;

use tracing::{debug, trace};

use super::deferred::DeferredQueue;
use super::link::Link;
use super::merge::{MergeBuffer, MergeError, Writer};
use super::message::{LineUpdate, Message, MessageKind};
use super::victim::{Victim, VictimBuffer};
use crate::common::{ClientId, MemAddr, SimError, SimResult, WriteTag};
use crate::config::ComaConfig;
use crate::kernel::{Cycle, DelayLine};
use crate::memory::buffer::RequestBuffer;
use crate::memory::{ClientSet, MemResult, Payload, Request, RequestOp, client_mut};
use crate::stats::MemoryStats;

/// State of a cache line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineState {
    /// Way unused.
    Empty,
    /// Read request on the ring; no tokens yet.
    Loading,
    /// Collecting all tokens for a merged write; may hold some tokens.
    Acquiring,
    /// Holds at least one token and current data.
    Valid,
}

/// One way of a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// Current state.
    pub state: LineState,
    /// Line address.
    pub tag: MemAddr,
    /// Tokens held.
    pub tokens: usize,
    /// Priority token held.
    pub priority: bool,
    /// Data differs from the backing store.
    pub dirty: bool,
    /// Contents; meaningful only while `tokens > 0`.
    pub data: Vec<u8>,
    /// Cycle of the last client access, for LRU replacement.
    pub last_used: Cycle,
}

impl Line {
    fn empty(line_size: usize) -> Self {
        Self {
            state: LineState::Empty,
            tag: MemAddr(0),
            tokens: 0,
            priority: false,
            dirty: false,
            data: vec![0; line_size],
            last_used: 0,
        }
    }

    fn reset(&mut self) {
        self.state = LineState::Empty;
        self.tokens = 0;
        self.priority = false;
        self.dirty = false;
    }

    /// Returns true if the line holds current data.
    pub const fn has_data(&self) -> bool {
        self.tokens > 0
    }
}

/// A callback waiting to be delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Data for a delayed read.
    Read {
        /// Reader.
        client: ClientId,
        /// Address read.
        addr: MemAddr,
        /// Bytes read.
        data: Payload,
    },
    /// A write became visible everywhere.
    Write {
        /// Writer.
        client: ClientId,
        /// Tag to hand back.
        tag: WriteTag,
    },
}

/// Outcome of servicing one queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Service {
    /// Finished; the request leaves the queue.
    Done,
    /// A ring transaction was started; wait in the deferred queue.
    Park,
    /// A resource was busy; try again next cycle.
    Retry,
}

/// One cache of the ring.
#[derive(Debug)]
pub struct Cache {
    name: String,
    index: usize,
    num_tokens: usize,
    line_size: usize,
    sets: usize,
    ways: usize,
    lines: Vec<Line>,
    lookup: DelayLine<Message>,
    queue: RequestBuffer<Request>,
    deferred: DeferredQueue<Request>,
    merge: MergeBuffer,
    victims: VictimBuffer,
    completions: VecDeque<Completion>,
    clients: Vec<ClientId>,
    /// Line the network side worked on this cycle.
    touched: Option<MemAddr>,
}

impl Cache {
    /// Creates cache `index` of a ring where each line has `num_tokens` tokens.
    pub fn new(
        index: usize,
        num_tokens: usize,
        line_size: usize,
        config: &ComaConfig,
    ) -> SimResult<Self> {
        let queue = RequestBuffer::new(config.request_buffer)?;
        Ok(Self {
            name: format!("cache{index}"),
            index,
            num_tokens,
            line_size,
            sets: config.sets,
            ways: config.associativity,
            lines: vec![Line::empty(line_size); config.sets * config.associativity],
            lookup: DelayLine::new(config.lookup_latency, config.lookup_latency as usize + 1),
            queue,
            deferred: DeferredQueue::new(config.deferred_high, config.deferred_low),
            merge: MergeBuffer::new(config.merge_slots, line_size),
            victims: VictimBuffer::new(config.victim_entries),
            completions: VecDeque::new(),
            clients: Vec::new(),
            touched: None,
        })
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maps a client onto this cache.
    pub fn add_client(&mut self, client: ClientId) {
        self.clients.push(client);
    }

    fn set_range(&self, line: MemAddr) -> Range<usize> {
        let set = ((line.val() / self.line_size as u64) % self.sets as u64) as usize;
        set * self.ways..(set + 1) * self.ways
    }

    fn find(&self, line: MemAddr) -> Option<usize> {
        self.set_range(line)
            .find(|&i| self.lines[i].state != LineState::Empty && self.lines[i].tag == line)
    }

    /// Returns the way holding `line`, if any.
    pub fn line(&self, line: MemAddr) -> Option<&Line> {
        self.find(line).map(|i| &self.lines[i])
    }

    /// Returns the victim entry for `line`, if any.
    pub fn victim(&self, line: MemAddr) -> Option<&Victim> {
        self.victims.find(line)
    }

    /// Messages inside the lookup pipeline.
    pub fn in_flight(&self) -> impl Iterator<Item = &Message> {
        self.lookup.iter()
    }

    /// Tokens and priority tokens this cache holds for `line`, victims included.
    pub fn holding(&self, line: MemAddr) -> (usize, usize) {
        let mut tokens = 0;
        let mut priority = 0;
        if let Some(l) = self.line(line) {
            tokens += l.tokens;
            priority += usize::from(l.priority);
        }
        if let Some(v) = self.victims.find(line) {
            tokens += v.tokens;
            priority += usize::from(v.priority);
        }
        (tokens, priority)
    }

    /// Current data for `line` if this cache holds a token for it.
    pub fn current_data(&self, line: MemAddr) -> Option<&[u8]> {
        match self.line(line) {
            Some(l) if l.has_data() => Some(&l.data),
            _ => self.victims.find(line).map(|v| &v.data[..]),
        }
    }

    /// Overwrites bytes of every held copy of `line`, for administrative loads.
    pub fn patch(&mut self, line: MemAddr, offset: usize, bytes: &[u8]) {
        let range = offset..offset + bytes.len();
        if let Some(i) = self.find(line) {
            if self.lines[i].has_data() {
                self.lines[i].data[range.clone()].copy_from_slice(bytes);
            }
        }
        if let Some(v) = self.victims.find_mut(line) {
            v.data[range].copy_from_slice(bytes);
        }
    }

    fn has_queued(&self, line: MemAddr) -> bool {
        self.queue.iter().any(|r| r.addr.line(self.line_size) == line)
            || self.deferred.contains_line(line)
    }

    fn enqueue(&mut self, request: Request, stats: &mut MemoryStats) -> MemResult<()> {
        let is_read = matches!(request.op, RequestOp::Read { .. });
        if self.queue.push(request).is_err() {
            stats.rejected += 1;
            return MemResult::Failed;
        }
        if is_read {
            stats.reads += 1;
        } else {
            stats.writes += 1;
        }
        MemResult::Delayed
    }

    /// Client read. Hits are answered immediately.
    pub fn read(
        &mut self,
        now: Cycle,
        client: ClientId,
        addr: MemAddr,
        size: usize,
        stats: &mut MemoryStats,
    ) -> MemResult<Payload> {
        if self.deferred.buffer_priority() {
            stats.rejected += 1;
            return MemResult::Failed;
        }
        let line = addr.line(self.line_size);
        let offset = addr.line_offset(self.line_size);
        let request = Request {
            client,
            addr,
            op: RequestOp::Read { size },
        };
        if !self.has_queued(line) {
            if let Some(i) = self.find(line) {
                let l = &mut self.lines[i];
                if matches!(l.state, LineState::Valid | LineState::Acquiring) {
                    let backing = l.has_data().then_some(&l.data[..]);
                    return match self.merge.read(line, offset, size, backing) {
                        Some(bytes) => {
                            l.last_used = now;
                            stats.reads += 1;
                            stats.read_hits += 1;
                            MemResult::Ready(Payload::new(bytes))
                        }
                        None => {
                            stats.merge_locks += 1;
                            stats.rejected += 1;
                            MemResult::Failed
                        }
                    };
                }
            } else if let Some(v) = self.victims.find(line) {
                stats.reads += 1;
                stats.read_hits += 1;
                stats.victim_hits += 1;
                return MemResult::Ready(Payload::from_slice(&v.data[offset..offset + size]));
            }
        }
        match self.enqueue(request, stats) {
            MemResult::Delayed => MemResult::Delayed,
            _ => MemResult::Failed,
        }
    }

    /// Client write. Writes to a line already collecting tokens join its merge slot.
    pub fn write(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        data: Payload,
        tag: WriteTag,
        stats: &mut MemoryStats,
    ) -> MemResult<()> {
        if self.deferred.buffer_priority() {
            stats.rejected += 1;
            return MemResult::Failed;
        }
        let line = addr.line(self.line_size);
        if !self.has_queued(line) {
            if let Some(i) = self.find(line) {
                if self.lines[i].state == LineState::Acquiring {
                    let offset = addr.line_offset(self.line_size);
                    return match self.merge.merge(line, offset, &data, Writer { client, tag }) {
                        Ok(allocated) => {
                            Self::count_merge(allocated, stats);
                            stats.writes += 1;
                            MemResult::Delayed
                        }
                        Err(_) => {
                            stats.rejected += 1;
                            MemResult::Failed
                        }
                    };
                }
            }
        }
        self.enqueue(
            Request {
                client,
                addr,
                op: RequestOp::Write { data, tag },
            },
            stats,
        )
    }

    const fn count_merge(allocated: bool, stats: &mut MemoryStats) {
        if allocated {
            stats.merge_allocations += 1;
        } else {
            stats.merges += 1;
        }
    }

    /// Advances the cache by one cycle.
    ///
    /// # Arguments
    ///
    /// * `input` - This cache's ring input.
    /// * `output` - The next node's ring input.
    pub fn cycle(
        &mut self,
        now: Cycle,
        input: &mut Link,
        output: &mut Link,
        clients: &mut dyn ClientSet,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        self.touched = None;
        let mut progressed = self.deliver(clients, stats)?;
        progressed |= self.network(now, output, clients, stats)?;
        progressed |= self.service_queue(now, output, stats)?;
        progressed |= self.service_deferred(now, output, stats)?;
        progressed |= self.send_eviction(output, stats);
        if self.lookup.has_space() {
            if let Some(msg) = input.pop() {
                trace!(cache = %self.name, %msg, "lookup");
                if self.lookup.push(now, msg).is_err() {
                    return Err(SimError::coherence(format!(
                        "{}: lookup pipeline refused a message",
                        self.name
                    )));
                }
                progressed = true;
            }
        }
        Ok(progressed)
    }

    fn deliver(&mut self, clients: &mut dyn ClientSet, stats: &mut MemoryStats) -> SimResult<bool> {
        let mut progressed = false;
        while let Some(completion) = self.completions.front() {
            let accepted = match completion {
                Completion::Read { client, addr, data } => {
                    client_mut(clients, *client)?.on_read_completed(*addr, data)
                }
                Completion::Write { client, tag } => {
                    client_mut(clients, *client)?.on_write_completed(*tag)
                }
            };
            if !accepted {
                stats.callback_retries += 1;
                break;
            }
            let _ = self.completions.pop_front();
            progressed = true;
        }
        Ok(progressed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  Network side
    // ═══════════════════════════════════════════════════════════════════════

    fn network(
        &mut self,
        now: Cycle,
        output: &mut Link,
        clients: &mut dyn ClientSet,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        let Some(head) = self.lookup.peek_ready(now) else {
            return Ok(false);
        };
        if head.kind == MessageKind::Update && !self.snoop_update(head, clients, stats)? {
            return Ok(false);
        }
        let Some(mut msg) = self.lookup.pop_ready(now) else {
            return Ok(false);
        };
        let line = msg.address;
        self.touched = Some(line);
        let home = msg.sender == self.index;
        let forward = match msg.kind {
            MessageKind::Request | MessageKind::RequestData => {
                self.on_request(home, &mut msg, stats)?
            }
            MessageKind::RequestDataToken => self.on_acquire(home, &mut msg, stats)?,
            MessageKind::Eviction => home || !self.absorb_eviction(&msg),
            MessageKind::Update => {
                if home {
                    self.complete_update(&mut msg)?;
                }
                !home
            }
        };
        if forward {
            output.forward(msg);
        }
        if home {
            let _ = self.serve_parked(line, now);
        }
        Ok(true)
    }

    /// Answers the reads parked on `line` once it holds data, in arrival
    /// order up to the first parked write.
    ///
    /// Returns the number of reads answered.
    fn serve_parked(&mut self, line: MemAddr, now: Cycle) -> usize {
        let Some(i) = self.find(line).filter(|&i| self.lines[i].has_data()) else {
            return 0;
        };
        if !self.deferred.contains_line(line) {
            return 0;
        }
        let mut served = 0;
        let mut blocked = false;
        let mut kept = VecDeque::new();
        for (l, request) in self.deferred.take_all() {
            let size = match request.op {
                RequestOp::Read { size } if l == line && !blocked => size,
                _ => {
                    blocked |= l == line;
                    kept.push_back((l, request));
                    continue;
                }
            };
            let offset = request.addr.line_offset(self.line_size);
            match self.merge.read(line, offset, size, Some(&self.lines[i].data)) {
                Some(bytes) => {
                    self.completions.push_back(Completion::Read {
                        client: request.client,
                        addr: request.addr,
                        data: Payload::new(bytes),
                    });
                    served += 1;
                }
                None => {
                    blocked = true;
                    kept.push_back((l, request));
                }
            }
        }
        self.deferred.restore(kept);
        if served > 0 {
            self.lines[i].last_used = now;
            trace!(cache = %self.name, %line, served, "parked reads answered on arrival");
        }
        served
    }

    fn snoop_update(
        &self,
        msg: &Message,
        clients: &mut dyn ClientSet,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        let update = msg
            .update
            .as_ref()
            .ok_or_else(|| SimError::coherence(format!("{}: {msg} has no payload", self.name)))?;
        let Some(span) = update.span() else {
            return Ok(true);
        };
        let addr = msg.address.add(span.start as u64);
        let data = &update.data[span];
        for &id in &self.clients {
            stats.snoops += 1;
            if !client_mut(clients, id)?.accepts_snoop(addr, data.len()) {
                debug!(cache = %self.name, %addr, client = id.0, "update held by snoop veto");
                stats.snoop_vetoes += 1;
                return Ok(false);
            }
        }
        for &id in &self.clients {
            client_mut(clients, id)?.on_snooped(addr, data);
        }
        Ok(true)
    }

    /// Returns true if the message moves on.
    fn on_request(
        &mut self,
        home: bool,
        msg: &mut Message,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        if home {
            if msg.tokens == 0 {
                stats.recirculations += 1;
                return Ok(true);
            }
            let i = self
                .find(msg.address)
                .filter(|&i| self.lines[i].state == LineState::Loading)
                .ok_or_else(|| {
                    SimError::coherence(format!("{}: {msg} returned to no loading line", self.name))
                })?;
            let data = msg.data.take().ok_or_else(|| {
                SimError::coherence(format!("{}: {msg} returned tokens without data", self.name))
            })?;
            let line = &mut self.lines[i];
            line.state = LineState::Valid;
            line.tokens = msg.tokens;
            line.priority = msg.priority;
            line.dirty = msg.dirty;
            line.data = data;
            debug!(cache = %self.name, %msg, "line loaded");
            return Ok(false);
        }
        if msg.tokens > 0 {
            return Ok(true);
        }
        if let Some(i) = self.find(msg.address) {
            let line = &mut self.lines[i];
            if line.state == LineState::Valid && line.tokens > 1 {
                line.tokens -= 1;
                Self::grant_copy(msg, &line.data, line.dirty, stats);
                return Ok(true);
            }
        }
        if let Some(v) = self.victims.find_mut(msg.address) {
            if v.tokens > 1 {
                v.tokens -= 1;
                stats.victim_hits += 1;
                Self::grant_copy(msg, &v.data, v.dirty, stats);
            }
        }
        Ok(true)
    }

    fn grant_copy(msg: &mut Message, data: &[u8], dirty: bool, stats: &mut MemoryStats) {
        msg.tokens = 1;
        msg.dirty = dirty;
        msg.data = Some(data.to_vec());
        msg.kind = MessageKind::RequestData;
        stats.msg_request_data += 1;
    }

    /// Returns true if the message moves on.
    fn on_acquire(
        &mut self,
        home: bool,
        msg: &mut Message,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        if home {
            return self.acquire_returned(msg, stats).map(|()| true);
        }
        if let Some(i) = self.find(msg.address) {
            let line = &mut self.lines[i];
            let surrender = match line.state {
                LineState::Valid => true,
                LineState::Acquiring => !line.priority,
                LineState::Empty | LineState::Loading => false,
            };
            if surrender && line.tokens > 0 {
                msg.tokens += line.tokens;
                msg.priority |= line.priority;
                msg.dirty |= line.dirty;
                if msg.data.is_none() {
                    msg.data = Some(line.data.clone());
                }
                trace!(cache = %self.name, %msg, "tokens surrendered");
                if line.state == LineState::Valid {
                    line.reset();
                } else {
                    line.tokens = 0;
                    line.priority = false;
                    line.dirty = false;
                }
            }
        }
        if let Some(v) = self.victims.take(msg.address) {
            msg.tokens += v.tokens;
            msg.priority |= v.priority;
            msg.dirty |= v.dirty;
            if msg.data.is_none() {
                msg.data = Some(v.data);
            }
            trace!(cache = %self.name, %msg, "victim surrendered");
        }
        Ok(true)
    }

    /// Folds a returning acquisition into the line and commits the merged
    /// write once every token is here. The message is turned into the
    /// resulting update or sent round again.
    fn acquire_returned(&mut self, msg: &mut Message, stats: &mut MemoryStats) -> SimResult<()> {
        let i = self
            .find(msg.address)
            .filter(|&i| self.lines[i].state == LineState::Acquiring)
            .ok_or_else(|| {
                SimError::coherence(format!("{}: {msg} returned to no acquiring line", self.name))
            })?;
        let num_tokens = self.num_tokens;
        let line = &mut self.lines[i];
        if msg.tokens > 0 {
            if line.tokens == 0 {
                line.data = msg.data.take().ok_or_else(|| {
                    SimError::coherence(format!("{}: {msg} brought tokens without data", self.name))
                })?;
            }
            line.tokens += msg.tokens;
            line.priority |= msg.priority;
            line.dirty |= msg.dirty;
        }

        if line.tokens < num_tokens {
            msg.tokens = 0;
            msg.priority = false;
            msg.dirty = false;
            msg.data = None;
            stats.recirculations += 1;
            return Ok(());
        }
        if !line.priority {
            return Err(SimError::coherence(format!(
                "{}: all tokens for {} but no priority",
                self.name, msg.address
            )));
        }
        let slot = self.merge.take(msg.address).ok_or_else(|| {
            SimError::coherence(format!("{}: {} acquired without a merge slot", self.name, msg.address))
        })?;
        for (b, (&m, &d)) in line.data.iter_mut().zip(slot.mask.iter().zip(&slot.data)) {
            if m {
                *b = d;
            }
        }
        line.dirty = true;
        line.state = LineState::Valid;
        debug!(cache = %self.name, line = %msg.address, writers = slot.writers.len(), "merged write committed");

        *msg = Message::new(MessageKind::Update, msg.address, self.index);
        msg.update = Some(LineUpdate {
            data: slot.data,
            mask: slot.mask,
            writers: slot.writers,
        });
        stats.msg_update += 1;
        Ok(())
    }

    /// Returns true if a line here took the eviction's tokens.
    fn absorb_eviction(&mut self, msg: &Message) -> bool {
        let Some(i) = self.find(msg.address) else {
            return false;
        };
        let line = &mut self.lines[i];
        if !matches!(line.state, LineState::Valid | LineState::Acquiring) || line.tokens == 0 {
            return false;
        }
        line.tokens += msg.tokens;
        line.priority |= msg.priority;
        line.dirty |= msg.dirty;
        trace!(cache = %self.name, %msg, "eviction absorbed");
        true
    }

    fn complete_update(&mut self, msg: &mut Message) -> SimResult<()> {
        let update = msg
            .update
            .take()
            .ok_or_else(|| SimError::coherence(format!("{}: {msg} has no payload", self.name)))?;
        for w in update.writers {
            self.completions.push_back(Completion::Write {
                client: w.client,
                tag: w.tag,
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  Client side
    // ═══════════════════════════════════════════════════════════════════════

    /// Returns true if `request` must wait for a transaction on its line.
    fn must_wait(&self, line: MemAddr, request: &Request) -> bool {
        match self.line(line) {
            Some(l) if l.state == LineState::Loading => true,
            Some(l) if l.state == LineState::Acquiring => {
                matches!(request.op, RequestOp::Read { .. }) && !l.has_data()
            }
            _ => false,
        }
    }

    fn service_queue(
        &mut self,
        now: Cycle,
        output: &mut Link,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        let Some(request) = self.queue.front() else {
            return Ok(false);
        };
        let line = request.addr.line(self.line_size);
        if self.touched == Some(line) {
            stats.service_retries += 1;
            return Ok(false);
        }
        if self.deferred.contains_line(line) || self.must_wait(line, request) {
            if let Some(request) = self.queue.pop() {
                self.deferred.push(line, request);
                stats.deferred += 1;
            }
            return Ok(true);
        }
        let request = request.clone();
        match self.service(now, &request, output, stats)? {
            Service::Done => {
                let _ = self.queue.pop();
            }
            Service::Park => {
                let _ = self.queue.pop();
                self.deferred.push(line, request);
                stats.deferred += 1;
            }
            Service::Retry => {
                stats.service_retries += 1;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn service_deferred(
        &mut self,
        now: Cycle,
        output: &mut Link,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        if self.deferred.is_empty() {
            return Ok(false);
        }
        let mut progressed = false;
        let mut kept = VecDeque::new();
        let mut blocked: Vec<MemAddr> = Vec::new();
        for (line, request) in self.deferred.take_all() {
            let ready = !blocked.contains(&line)
                && self.touched != Some(line)
                && !self.must_wait(line, &request);
            let outcome = if ready {
                self.service(now, &request, output, stats)?
            } else {
                Service::Retry
            };
            if outcome == Service::Done {
                progressed = true;
            } else {
                blocked.push(line);
                kept.push_back((line, request));
            }
        }
        self.deferred.restore(kept);
        Ok(progressed)
    }

    fn service(
        &mut self,
        now: Cycle,
        request: &Request,
        output: &mut Link,
        stats: &mut MemoryStats,
    ) -> SimResult<Service> {
        match &request.op {
            RequestOp::Read { size } => Ok(self.service_read(now, request, *size, output, stats)),
            RequestOp::Write { data, tag } => {
                let writer = Writer {
                    client: request.client,
                    tag: *tag,
                };
                self.service_write(now, request.addr, data, writer, output, stats)
            }
        }
    }

    fn service_read(
        &mut self,
        now: Cycle,
        request: &Request,
        size: usize,
        output: &mut Link,
        stats: &mut MemoryStats,
    ) -> Service {
        let line = request.addr.line(self.line_size);
        let offset = request.addr.line_offset(self.line_size);
        if let Some(i) = self.find(line) {
            let l = &mut self.lines[i];
            if l.has_data() {
                let Some(bytes) = self.merge.read(line, offset, size, Some(&l.data)) else {
                    return Service::Retry;
                };
                l.last_used = now;
                self.completions.push_back(Completion::Read {
                    client: request.client,
                    addr: request.addr,
                    data: Payload::new(bytes),
                });
                return Service::Done;
            }
            return Service::Retry;
        }
        if let Some(v) = self.victims.find(line) {
            stats.victim_hits += 1;
            self.completions.push_back(Completion::Read {
                client: request.client,
                addr: request.addr,
                data: Payload::from_slice(&v.data[offset..offset + size]),
            });
            return Service::Done;
        }
        if !output.can_inject() {
            return Service::Retry;
        }
        let Some(i) = self.allocate(line, now, stats) else {
            return Service::Retry;
        };
        let l = &mut self.lines[i];
        l.reset();
        l.state = LineState::Loading;
        l.tag = line;
        l.last_used = now;
        self.inject(output, Message::new(MessageKind::Request, line, self.index));
        stats.msg_request += 1;
        Service::Park
    }

    fn service_write(
        &mut self,
        now: Cycle,
        addr: MemAddr,
        data: &[u8],
        writer: Writer,
        output: &mut Link,
        stats: &mut MemoryStats,
    ) -> SimResult<Service> {
        let line = addr.line(self.line_size);
        let offset = addr.line_offset(self.line_size);
        if self.find(line).is_none()
            && self.victims.find(line).is_some()
            && !self.reinstate(line, now, stats)
        {
            return Ok(Service::Retry);
        }

        let Some(i) = self.find(line) else {
            // Miss: claim a way and start collecting tokens.
            if !self.merge.has_free() || !output.can_inject() {
                return Ok(Service::Retry);
            }
            let Some(i) = self.allocate(line, now, stats) else {
                return Ok(Service::Retry);
            };
            let l = &mut self.lines[i];
            l.reset();
            l.state = LineState::Acquiring;
            l.tag = line;
            l.last_used = now;
            self.merge_write(line, offset, data, writer, stats)?;
            self.inject(output, Message::new(MessageKind::RequestDataToken, line, self.index));
            stats.msg_request_data_token += 1;
            return Ok(Service::Done);
        };

        match self.lines[i].state {
            LineState::Valid if self.lines[i].tokens == self.num_tokens => {
                if !output.can_inject() {
                    return Ok(Service::Retry);
                }
                let l = &mut self.lines[i];
                l.data[offset..offset + data.len()].copy_from_slice(data);
                l.dirty = true;
                l.last_used = now;
                let mut mask = vec![false; self.line_size];
                mask[offset..offset + data.len()].fill(true);
                let mut msg = Message::new(MessageKind::Update, line, self.index);
                msg.update = Some(LineUpdate {
                    data: l.data.clone(),
                    mask,
                    writers: vec![writer],
                });
                self.inject(output, msg);
                stats.msg_update += 1;
                Ok(Service::Done)
            }
            LineState::Valid => {
                if !self.merge.can_merge(line) || !output.can_inject() {
                    return Ok(Service::Retry);
                }
                self.merge_write(line, offset, data, writer, stats)?;
                let l = &mut self.lines[i];
                l.state = LineState::Acquiring;
                l.last_used = now;
                self.inject(output, Message::new(MessageKind::RequestDataToken, line, self.index));
                stats.msg_request_data_token += 1;
                Ok(Service::Done)
            }
            LineState::Acquiring => {
                if !self.merge.can_merge(line) {
                    return Ok(Service::Retry);
                }
                self.merge_write(line, offset, data, writer, stats)?;
                self.lines[i].last_used = now;
                Ok(Service::Done)
            }
            LineState::Loading | LineState::Empty => Ok(Service::Retry),
        }
    }

    fn merge_write(
        &mut self,
        line: MemAddr,
        offset: usize,
        data: &[u8],
        writer: Writer,
        stats: &mut MemoryStats,
    ) -> SimResult<()> {
        match self.merge.merge(line, offset, data, writer) {
            Ok(allocated) => {
                Self::count_merge(allocated, stats);
                Ok(())
            }
            Err(MergeError::Locked | MergeError::Full) => Err(SimError::coherence(format!(
                "{}: merge into {line} refused after check",
                self.name
            ))),
        }
    }

    fn inject(&self, output: &mut Link, msg: Message) {
        trace!(cache = %self.name, %msg, "inject");
        // Callers check `can_inject` before touching any state.
        let _ = output.try_inject(msg);
    }

    /// Picks a way for `line`, evicting the least recently used valid line
    /// into the victim buffer if the set is full.
    fn allocate(&mut self, line: MemAddr, now: Cycle, stats: &mut MemoryStats) -> Option<usize> {
        let range = self.set_range(line);
        if let Some(i) = range.clone().find(|&i| self.lines[i].state == LineState::Empty) {
            return Some(i);
        }
        if !self.victims.has_space() {
            return None;
        }
        let i = range
            .filter(|&i| self.lines[i].state == LineState::Valid && !self.merge.contains(self.lines[i].tag))
            .min_by_key(|&i| self.lines[i].last_used)?;
        let l = &mut self.lines[i];
        let victim = Victim {
            line: l.tag,
            tokens: l.tokens,
            priority: l.priority,
            dirty: l.dirty,
            data: std::mem::replace(&mut l.data, vec![0; self.line_size]),
        };
        debug!(cache = %self.name, line = %victim.line, tokens = victim.tokens, now, "line evicted");
        l.reset();
        stats.evictions += 1;
        // Space was checked above.
        let _ = self.victims.push(victim);
        Some(i)
    }

    /// Moves a victim back into the line array. Returns false if no way is free.
    fn reinstate(&mut self, line: MemAddr, now: Cycle, stats: &mut MemoryStats) -> bool {
        let Some(i) = self
            .set_range(line)
            .find(|&i| self.lines[i].state == LineState::Empty)
        else {
            return false;
        };
        let Some(v) = self.victims.take(line) else {
            return false;
        };
        stats.victim_hits += 1;
        self.lines[i] = Line {
            state: LineState::Valid,
            tag: line,
            tokens: v.tokens,
            priority: v.priority,
            dirty: v.dirty,
            data: v.data,
            last_used: now,
        };
        true
    }

    fn send_eviction(&mut self, output: &mut Link, stats: &mut MemoryStats) -> bool {
        if self.victims.is_empty() || !output.can_inject() {
            return false;
        }
        let Some(v) = self.victims.pop_front() else {
            return false;
        };
        let mut msg = Message::new(MessageKind::Eviction, v.line, self.index);
        msg.tokens = v.tokens;
        msg.priority = v.priority;
        if v.dirty {
            msg.dirty = true;
            msg.data = Some(v.data);
        }
        self.inject(output, msg);
        stats.msg_eviction += 1;
        true
    }

    /// Returns true if nothing is queued, in flight or pending.
    pub fn is_idle(&self) -> bool {
        self.lookup.is_empty()
            && self.queue.is_empty()
            && self.deferred.is_empty()
            && self.victims.is_empty()
            && self.completions.is_empty()
            && self.merge.is_empty()
            && self
                .lines
                .iter()
                .all(|l| matches!(l.state, LineState::Empty | LineState::Valid))
    }

    /// Describes outstanding work, or `None` when idle.
    pub fn dump_state(&self) -> Option<String> {
        if self.is_idle() {
            return None;
        }
        let pending: Vec<String> = self
            .lines
            .iter()
            .filter(|l| matches!(l.state, LineState::Loading | LineState::Acquiring))
            .map(|l| format!("{}:{:?}/{}", l.tag, l.state, l.tokens))
            .collect();
        Some(format!(
            "{}: lookup={} queue={} deferred={} victims={} completions={} merge={} pending=[{}]",
            self.name,
            self.lookup.len(),
            self.queue.len(),
            self.deferred.len(),
            self.victims.len(),
            self.completions.len(),
            self.merge.len(),
            pending.join(", ")
        ))
    }
}
