//! Token-coherent COMA ring.
//!
//! The hierarchy is two levels of unidirectional rings:
//! 1. **Sub-rings:** `caches_per_ring` caches in a loop closed by a directory.
//! 2. **Top ring:** The directories and the root directory, which owns the backing store.
//!
//! Coherence follows a token protocol. Every line has one token per cache; a
//! reader needs one token and the data, a writer needs all of them. One token
//! per line carries priority, and it settles races between writers.
//!
//! Every ring node reads one input link. Links are indexed as follows, with `N`
//! caches and `R` rings:
//! * `0..N` - cache inputs;
//! * `N + r` - bottom input of directory `r` (from the last cache of its sub-ring);
//! * `N + R + r` - top input of directory `r`;
//! * `N + 2R` - root input.

/// COMA cache node.
pub mod cache;
/// Deferred request queue.
pub mod deferred;
/// Sub-ring directory.
pub mod directory;
/// Ring links.
pub mod link;
/// Merge-store buffer.
pub mod merge;
/// Ring messages.
pub mod message;
/// Root directory.
pub mod root;
/// Victim buffer.
pub mod victim;

use tracing::{debug, info};

use self::cache::Cache;
use self::directory::{Directory, Route};
use self::link::Link;
use self::root::RootDirectory;
use super::storage::Storage;
use super::{ClientSet, MemResult, Memory, Payload};
use crate::common::{ClientId, MAX_MEMORY_OPERATION_SIZE, MemAddr, SimError, SimResult, WriteTag};
use crate::config::{ComaConfig, MemoryConfig};
use crate::kernel::{Activity, Cycle};
use crate::stats::MemoryStats;

/// Borrows two distinct links at once.
fn pair_mut(links: &mut [Link], a: usize, b: usize) -> (&mut Link, &mut Link) {
    if a < b {
        let (lo, hi) = links.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = links.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// The COMA memory system.
#[derive(Debug)]
pub struct ComaMemory {
    name: String,
    caches_per_ring: usize,
    rings: usize,
    line_size: usize,
    caches: Vec<Cache>,
    directories: Vec<Directory>,
    root: RootDirectory,
    links: Vec<Link>,
    clients: Vec<String>,
    now: Cycle,
    stats: MemoryStats,
}

impl ComaMemory {
    /// Builds the ring hierarchy.
    ///
    /// # Arguments
    ///
    /// * `memory` - Backing store size, line size and latencies.
    /// * `coma` - Ring shape and per-cache resources.
    pub fn new(memory: &MemoryConfig, coma: &ComaConfig) -> SimResult<Self> {
        let num_caches = coma.num_caches();
        if num_caches == 0 {
            return Err(SimError::invalid("COMA needs at least one cache"));
        }
        if coma.link_capacity < 2 {
            return Err(SimError::invalid("COMA links need room for two messages"));
        }
        let caches = (0..num_caches)
            .map(|i| Cache::new(i, num_caches, memory.line_size, coma))
            .collect::<SimResult<Vec<_>>>()?;
        let directories = (0..coma.rings)
            .map(|r| {
                let first = r * coma.caches_per_ring;
                Directory::new(format!("dir{r}"), first..first + coma.caches_per_ring, num_caches)
            })
            .collect();
        let latency = memory.base_latency + memory.line_latency;
        let root = RootDirectory::new(
            num_caches,
            memory.line_size,
            Storage::new(memory.size),
            latency,
        );
        let links = (0..num_caches + 2 * coma.rings + 1)
            .map(|_| Link::new(coma.link_capacity))
            .collect();
        info!(caches = num_caches, rings = coma.rings, "COMA ring built");
        Ok(Self {
            name: "coma".to_owned(),
            caches_per_ring: coma.caches_per_ring,
            rings: coma.rings,
            line_size: memory.line_size,
            caches,
            directories,
            root,
            links,
            clients: Vec::new(),
            now: 0,
            stats: MemoryStats::default(),
        })
    }

    /// Number of caches, which is also the number of tokens per line.
    pub fn num_caches(&self) -> usize {
        self.caches.len()
    }

    /// The caches, in ring order.
    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    /// The sub-ring directories.
    pub fn directories(&self) -> &[Directory] {
        &self.directories
    }

    /// Index of the cache serving `client`.
    pub fn cache_of(&self, client: ClientId) -> usize {
        client.0 % self.caches.len()
    }

    fn bottom(&self, ring: usize) -> usize {
        self.caches.len() + ring
    }

    fn top(&self, ring: usize) -> usize {
        self.caches.len() + self.rings + ring
    }

    fn root_input(&self) -> usize {
        self.caches.len() + 2 * self.rings
    }

    /// Input link of the node after cache `i`.
    fn after_cache(&self, i: usize) -> usize {
        if i % self.caches_per_ring + 1 < self.caches_per_ring {
            i + 1
        } else {
            self.bottom(i / self.caches_per_ring)
        }
    }

    fn route_target(&self, ring: usize, route: Route) -> usize {
        match route {
            Route::Down => ring * self.caches_per_ring,
            Route::Up if ring + 1 < self.rings => self.top(ring + 1),
            Route::Up => self.root_input(),
        }
    }

    fn check_request(&self, client: ClientId, addr: MemAddr, size: usize) -> SimResult<()> {
        if client.0 >= self.clients.len() {
            return Err(SimError::invalid(format!("{}: unknown client {}", self.name, client.0)));
        }
        if size == 0 || size > MAX_MEMORY_OPERATION_SIZE {
            return Err(SimError::invalid(format!(
                "{}: memory operation of {size} bytes (max {MAX_MEMORY_OPERATION_SIZE})",
                self.name
            )));
        }
        if !self.root.storage().contains(addr, size) {
            return Err(SimError::invalid(format!(
                "{}: {size} bytes at {addr} outside memory",
                self.name
            )));
        }
        if addr.line_offset(self.line_size) + size > self.line_size {
            return Err(SimError::invalid(format!(
                "{}: {size} bytes at {addr} cross a line boundary",
                self.name
            )));
        }
        Ok(())
    }

    fn cycle_directories(&mut self) -> SimResult<bool> {
        let mut progressed = false;
        for r in 0..self.rings {
            let (bottom, top) = (self.bottom(r), self.top(r));
            if let Some(msg) = self.links[bottom].pop() {
                let route = self.directories[r].from_bottom(&msg)?;
                let target = self.route_target(r, route);
                self.links[target].forward(msg);
                progressed = true;
            }
            if let Some(msg) = self.links[top].pop() {
                let route = self.directories[r].from_top(&msg)?;
                let target = self.route_target(r, route);
                self.links[target].forward(msg);
                progressed = true;
            }
        }
        Ok(progressed)
    }

    /// Tokens and priority holders for `line` across the whole system,
    /// messages in flight included.
    pub fn census(&self, line: MemAddr) -> (usize, usize) {
        let (root_tokens, root_priority) = self.root.holding(line);
        let mut tokens = root_tokens;
        let mut priority = usize::from(root_priority);
        for cache in &self.caches {
            let (t, p) = cache.holding(line);
            tokens += t;
            priority += p;
        }
        let messages = self
            .links
            .iter()
            .flat_map(Link::iter)
            .chain(self.caches.iter().flat_map(Cache::in_flight))
            .chain(self.root.in_flight());
        for msg in messages.filter(|m| m.address == line) {
            tokens += msg.tokens;
            priority += usize::from(msg.priority);
        }
        (tokens, priority)
    }

    /// Checks that every token of `line` is accounted for and exactly one
    /// of them is the priority token.
    pub fn check_line(&self, line: MemAddr) -> SimResult<()> {
        let (tokens, priority) = self.census(line);
        if tokens != self.caches.len() || priority != 1 {
            return Err(SimError::coherence(format!(
                "{line}: {tokens} of {} tokens, {priority} priority holders",
                self.caches.len()
            )));
        }
        Ok(())
    }

    /// Checks every line that has left the root.
    pub fn check_tokens(&self) -> SimResult<()> {
        self.root.lines_out().try_for_each(|line| self.check_line(line))
    }

    /// Current contents of one line.
    fn line_contents(&self, line: MemAddr) -> SimResult<Vec<u8>> {
        if let Some(data) = self.caches.iter().find_map(|c| c.current_data(line)) {
            return Ok(data.to_vec());
        }
        let in_flight = self
            .links
            .iter()
            .flat_map(Link::iter)
            .chain(self.caches.iter().flat_map(Cache::in_flight))
            .find(|m| m.address == line && m.tokens > 0 && m.data.is_some());
        if let Some(data) = in_flight.and_then(|m| m.data.as_ref()) {
            return Ok(data.clone());
        }
        Ok(self.root.storage().read(line, self.line_size)?.to_vec())
    }
}

impl Memory for ComaMemory {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_client(&mut self, name: &str) -> SimResult<ClientId> {
        let id = ClientId(self.clients.len());
        let cache = self.cache_of(id);
        self.caches[cache].add_client(id);
        self.clients.push(name.to_owned());
        debug!(memory = %self.name, client = name, cache, "client registered");
        Ok(id)
    }

    fn read(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        size: usize,
    ) -> SimResult<MemResult<Payload>> {
        self.check_request(client, addr, size)?;
        let cache = self.cache_of(client);
        Ok(self.caches[cache].read(self.now, client, addr, size, &mut self.stats))
    }

    fn write(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        data: Payload,
        tag: WriteTag,
        _clients: &mut dyn ClientSet,
    ) -> SimResult<MemResult<()>> {
        self.check_request(client, addr, data.len())?;
        let cache = self.cache_of(client);
        Ok(self.caches[cache].write(client, addr, data, tag, &mut self.stats))
    }

    fn cycle(&mut self, now: Cycle, clients: &mut dyn ClientSet) -> SimResult<Activity> {
        self.now = now;
        let mut progressed = false;
        for i in 0..self.caches.len() {
            let next = self.after_cache(i);
            let (input, output) = pair_mut(&mut self.links, i, next);
            progressed |= self.caches[i].cycle(now, input, output, clients, &mut self.stats)?;
        }
        progressed |= self.cycle_directories()?;
        let (root_in, root_out) = (self.root_input(), self.top(0));
        let (input, output) = pair_mut(&mut self.links, root_in, root_out);
        progressed |= self.root.cycle(now, input, output)?;
        self.links.iter_mut().for_each(Link::commit);

        #[cfg(debug_assertions)]
        self.check_tokens()?;

        Ok(Activity {
            progressed,
            busy: !self.is_idle(),
        })
    }

    fn is_idle(&self) -> bool {
        self.links.iter().all(Link::is_empty)
            && self.caches.iter().all(Cache::is_idle)
            && self.root.is_idle()
    }

    fn check_address(&self, addr: MemAddr, size: usize) -> bool {
        self.root.storage().contains(addr, size)
    }

    fn load(&mut self, addr: MemAddr, data: &[u8]) -> SimResult<()> {
        self.root.storage_mut().write(addr, data)?;
        let mut done = 0;
        while done < data.len() {
            let at = addr.add(done as u64);
            let line = at.line(self.line_size);
            let offset = at.line_offset(self.line_size);
            let n = (self.line_size - offset).min(data.len() - done);
            for cache in &mut self.caches {
                cache.patch(line, offset, &data[done..done + n]);
            }
            done += n;
        }
        Ok(())
    }

    fn peek(&self, addr: MemAddr, len: usize) -> SimResult<Vec<u8>> {
        if !self.root.storage().contains(addr, len) {
            return Err(SimError::invalid(format!(
                "{}: {len} bytes at {addr} outside memory",
                self.name
            )));
        }
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let at = addr.add(out.len() as u64);
            let line = at.line(self.line_size);
            let offset = at.line_offset(self.line_size);
            let n = (self.line_size - offset).min(len - out.len());
            let contents = self.line_contents(line)?;
            out.extend_from_slice(&contents[offset..offset + n]);
        }
        Ok(out)
    }

    fn dump_state(&self) -> Vec<String> {
        let mut out: Vec<String> = self.caches.iter().filter_map(Cache::dump_state).collect();
        for dir in &self.directories {
            if dir.tracked_lines() > 0 {
                out.push(format!("{}: {} lines below", dir.name(), dir.tracked_lines()));
            }
        }
        for (i, link) in self.links.iter().enumerate() {
            if !link.is_empty() {
                out.push(format!("link{i}: {} messages", link.len()));
            }
        }
        if !self.root.is_idle() {
            out.push(format!("root: {} waiting on memory", self.root.in_flight().count()));
        }
        out
    }

    fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }
}
