//! Flat timed memories.
//!
//! A flat memory is a single backing store behind one or more serial timing
//! ports. The three arrangements differ only in how a request picks its port:
//! 1. **Simple:** One port; every request completes in arrival order.
//! 2. **Parallel:** Several ports; clients are assigned round-robin at registration.
//! 3. **Banked:** Several banks; the bank is the line address modulo the bank count.
//!
//! Writes snoop every registered client before anything is queued. A single veto
//! fails the write and leaves the buffers and the store untouched.

use tracing::{debug, warn};

use super::port::{FlatRequest, PortTiming, TimingPort};
use super::storage::Storage;
use super::{ClientSet, MemResult, Memory, Payload, Request, RequestOp, client_mut};
use crate::common::{
    ClientId, INFINITE, MAX_MEMORY_OPERATION_SIZE, MemAddr, SimError, SimResult, WriteTag,
};
use crate::config::{MemoryConfig, MemoryKind};
use crate::kernel::{Activity, Cycle};
use crate::stats::MemoryStats;

/// How a request selects its port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routing {
    /// Single port.
    Serial,
    /// Port fixed per client, assigned round-robin at registration.
    RoundRobin,
    /// Port chosen by line address.
    Banked,
}

#[derive(Debug, Clone)]
struct ClientInfo {
    name: String,
    port: usize,
}

/// A backing store behind timed ports.
#[derive(Debug)]
pub struct FlatMemory {
    name: String,
    routing: Routing,
    ports: Vec<TimingPort>,
    storage: Storage,
    clients: Vec<ClientInfo>,
    line_size: usize,
    now: Cycle,
    stats: MemoryStats,
}

impl FlatMemory {
    /// Builds a flat memory with `num_ports` ports.
    ///
    /// # Arguments
    ///
    /// * `name` - Component name used in logs and deadlock dumps.
    /// * `routing` - Port selection policy.
    /// * `num_ports` - Number of ports or banks; forced to one for `Serial`.
    /// * `config` - Size, line size, latencies and buffer depth.
    pub fn new(
        name: impl Into<String>,
        routing: Routing,
        num_ports: usize,
        config: &MemoryConfig,
    ) -> SimResult<Self> {
        let name = name.into();
        let num_ports = if routing == Routing::Serial {
            1
        } else {
            num_ports
        };
        if num_ports == 0 {
            return Err(SimError::invalid(format!("{name}: needs at least one port")));
        }
        if !config.line_size.is_power_of_two() {
            return Err(SimError::invalid(format!(
                "{name}: line size {} is not a power of two",
                config.line_size
            )));
        }
        let timing = PortTiming {
            base_latency: config.base_latency,
            line_latency: config.line_latency,
            line_size: config.line_size,
        };
        let capacity = config.buffer_size.unwrap_or(INFINITE);
        let ports = (0..num_ports)
            .map(|i| TimingPort::new(format!("{name}.port{i}"), capacity, timing))
            .collect::<SimResult<Vec<_>>>()?;
        Ok(Self {
            name,
            routing,
            ports,
            storage: Storage::new(config.size),
            clients: Vec::new(),
            line_size: config.line_size,
            now: 0,
            stats: MemoryStats::default(),
        })
    }

    /// One serial port.
    pub fn simple(config: &MemoryConfig) -> SimResult<Self> {
        Self::new("memory", Routing::Serial, 1, config)
    }

    /// `config.ports` ports assigned to clients round-robin.
    pub fn parallel(config: &MemoryConfig) -> SimResult<Self> {
        Self::new("memory", Routing::RoundRobin, config.ports, config)
    }

    /// `config.banks` banks selected by line address.
    pub fn banked(config: &MemoryConfig) -> SimResult<Self> {
        Self::new("memory", Routing::Banked, config.banks, config)
    }

    /// Builds the arrangement named by `config.kind`.
    pub fn from_config(config: &MemoryConfig) -> SimResult<Self> {
        match config.kind {
            MemoryKind::Simple => Self::simple(config),
            MemoryKind::Parallel => Self::parallel(config),
            MemoryKind::Banked => Self::banked(config),
            MemoryKind::Coma => Err(SimError::invalid(
                "COMA is not a flat memory; build a ComaMemory instead",
            )),
        }
    }

    /// Number of ports or banks.
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    fn port_for(&self, client: ClientId, addr: MemAddr) -> SimResult<usize> {
        let info = self
            .clients
            .get(client.0)
            .ok_or_else(|| SimError::invalid(format!("{}: unknown client {}", self.name, client.0)))?;
        Ok(match self.routing {
            Routing::Serial => 0,
            Routing::RoundRobin => info.port,
            Routing::Banked => {
                let line = addr.val() / self.line_size as u64;
                (line % self.ports.len() as u64) as usize
            }
        })
    }

    fn check_request(&self, addr: MemAddr, size: usize) -> SimResult<()> {
        if size == 0 || size > MAX_MEMORY_OPERATION_SIZE {
            return Err(SimError::invalid(format!(
                "{}: memory operation of {size} bytes (max {MAX_MEMORY_OPERATION_SIZE})",
                self.name
            )));
        }
        if !self.storage.contains(addr, size) {
            return Err(SimError::invalid(format!(
                "{}: {size} bytes at {addr} outside memory",
                self.name
            )));
        }
        Ok(())
    }
}

impl Memory for FlatMemory {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_client(&mut self, name: &str) -> SimResult<ClientId> {
        let id = ClientId(self.clients.len());
        let port = id.0 % self.ports.len();
        debug!(memory = %self.name, client = name, port, "client registered");
        self.clients.push(ClientInfo {
            name: name.to_owned(),
            port,
        });
        Ok(id)
    }

    fn read(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        size: usize,
    ) -> SimResult<MemResult<Payload>> {
        self.check_request(addr, size)?;
        let port = self.port_for(client, addr)?;
        let request = FlatRequest::new(
            Request {
                client,
                addr,
                op: RequestOp::Read { size },
            },
            self.now,
        );
        if self.ports[port].submit(request).is_err() {
            self.stats.rejected += 1;
            return Ok(MemResult::Failed);
        }
        self.stats.reads += 1;
        Ok(MemResult::Delayed)
    }

    fn write(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        data: Payload,
        tag: WriteTag,
        clients: &mut dyn ClientSet,
    ) -> SimResult<MemResult<()>> {
        self.check_request(addr, data.len())?;
        let port = self.port_for(client, addr)?;
        if self.ports[port].is_full() {
            self.stats.rejected += 1;
            return Ok(MemResult::Failed);
        }

        for (i, info) in self.clients.iter().enumerate() {
            self.stats.snoops += 1;
            if !client_mut(clients, ClientId(i))?.accepts_snoop(addr, data.len()) {
                warn!(memory = %self.name, snooper = %info.name, %addr, "write vetoed by snoop");
                self.stats.snoop_vetoes += 1;
                return Ok(MemResult::Failed);
            }
        }
        for i in 0..self.clients.len() {
            client_mut(clients, ClientId(i))?.on_snooped(addr, &data);
        }

        let request = FlatRequest::new(
            Request {
                client,
                addr,
                op: RequestOp::Write { data, tag },
            },
            self.now,
        );
        if self.ports[port].submit(request).is_err() {
            return Err(SimError::invalid(format!(
                "{}: port {port} filled between check and submit",
                self.name
            )));
        }
        self.stats.writes += 1;
        Ok(MemResult::Delayed)
    }

    fn cycle(&mut self, now: Cycle, clients: &mut dyn ClientSet) -> SimResult<Activity> {
        self.now = now;
        let mut progressed = false;
        for port in &mut self.ports {
            progressed |= port.cycle(now, &mut self.storage, clients, &mut self.stats)?;
        }
        Ok(Activity {
            progressed,
            busy: !self.is_idle(),
        })
    }

    fn is_idle(&self) -> bool {
        self.ports.iter().all(TimingPort::is_idle)
    }

    fn check_address(&self, addr: MemAddr, size: usize) -> bool {
        self.storage.contains(addr, size)
    }

    fn load(&mut self, addr: MemAddr, data: &[u8]) -> SimResult<()> {
        self.storage.write(addr, data)
    }

    fn peek(&self, addr: MemAddr, len: usize) -> SimResult<Vec<u8>> {
        Ok(self.storage.read(addr, len)?.to_vec())
    }

    fn dump_state(&self) -> Vec<String> {
        self.ports.iter().filter_map(TimingPort::dump_state).collect()
    }

    fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }
}
