//! Serial timing port.
//!
//! A port serves its request buffer strictly in order, one request at a time.
//! A request issued at cycle `t` starts at `max(t, previous completion)` and
//! completes `base + per_line * ceil(size / line_size)` cycles later. Its
//! callback is delivered exactly once; a client that refuses it is offered the
//! same completion again next cycle and the port does not advance meanwhile.

use tracing::debug;

use super::buffer::RequestBuffer;
use super::storage::Storage;
use super::{ClientSet, Request, RequestOp, client_mut};
use crate::common::SimResult;
use crate::kernel::Cycle;
use crate::stats::MemoryStats;

/// Latency parameters shared by every port of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortTiming {
    /// Fixed cycles per request.
    pub base_latency: u64,
    /// Cycles per line touched.
    pub line_latency: u64,
    /// Line size in bytes.
    pub line_size: usize,
}

impl PortTiming {
    /// Service time of a request of `size` bytes.
    pub fn latency(&self, size: usize) -> u64 {
        self.base_latency + self.line_latency * size.div_ceil(self.line_size) as u64
    }
}

/// A request waiting in, or being served by, a port.
#[derive(Clone, Debug)]
pub struct FlatRequest {
    /// The client request.
    pub request: Request,
    /// Cycle the request was accepted.
    pub issued_at: Cycle,
    done_at: Option<Cycle>,
}

impl FlatRequest {
    /// Wraps a request accepted at `issued_at`.
    pub const fn new(request: Request, issued_at: Cycle) -> Self {
        Self {
            request,
            issued_at,
            done_at: None,
        }
    }
}

/// One in-order service port with its request buffer.
#[derive(Debug)]
pub struct TimingPort {
    name: String,
    queue: RequestBuffer<FlatRequest>,
    timing: PortTiming,
    free_at: Cycle,
}

impl TimingPort {
    /// Creates a port with a buffer of `capacity` requests.
    pub fn new(name: impl Into<String>, capacity: usize, timing: PortTiming) -> SimResult<Self> {
        Ok(Self {
            name: name.into(),
            queue: RequestBuffer::new(capacity)?,
            timing,
            free_at: 0,
        })
    }

    /// Returns true if the buffer would reject a request.
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Returns true if nothing is queued or in service.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queues a request, handing it back if the buffer is full.
    pub fn submit(&mut self, request: FlatRequest) -> Result<(), FlatRequest> {
        self.queue.push(request)
    }

    /// Completes every request due by `now`, in order.
    ///
    /// # Returns
    ///
    /// True if at least one callback was delivered.
    pub fn cycle(
        &mut self,
        now: Cycle,
        storage: &mut Storage,
        clients: &mut dyn ClientSet,
        stats: &mut MemoryStats,
    ) -> SimResult<bool> {
        let mut progressed = false;
        while let Some(head) = self.queue.front_mut() {
            let done_at = match head.done_at {
                Some(at) => at,
                None => {
                    let at = head.issued_at.max(self.free_at)
                        + self.timing.latency(head.request.op.size());
                    head.done_at = Some(at);
                    at
                }
            };
            if done_at > now {
                break;
            }

            let req = &head.request;
            let client = client_mut(clients, req.client)?;
            let accepted = match &req.op {
                RequestOp::Read { size } => {
                    let data = storage.read(req.addr, *size)?;
                    client.on_read_completed(req.addr, data)
                }
                RequestOp::Write { tag, .. } => client.on_write_completed(*tag),
            };
            if !accepted {
                stats.callback_retries += 1;
                break;
            }

            if let RequestOp::Write { data, .. } = &req.op {
                storage.write(req.addr, data)?;
            }
            debug!(port = %self.name, addr = %req.addr, done_at, "request completed");
            self.free_at = done_at;
            let _ = self.queue.pop();
            progressed = true;
        }
        Ok(progressed)
    }

    /// Diagnostic summary, or `None` when idle.
    pub fn dump_state(&self) -> Option<String> {
        if self.is_idle() {
            return None;
        }
        let head = self
            .queue
            .front()
            .map(|r| format!("head {} from client {}", r.request.addr, r.request.client.0))
            .unwrap_or_default();
        Some(format!(
            "{}: {} queued, {head}, free at {}",
            self.name,
            self.queue.len(),
            self.free_at
        ))
    }
}
